// ── Core error types ──
//
// Errors surfaced by uicc-core. Modem failures arrive as `RilError` and
// are wrapped rather than flattened so callers can still ask whether a
// status word meant "file not found" or "wrong PIN".

use thiserror::Error;
use uicc_ril::RilError;

use crate::codec::CodecError;

/// Unified error type for the core crate.
///
/// `Clone` because one phonebook failure is fanned out to every waiter.
#[derive(Debug, Clone, Error)]
pub enum UiccError {
    // ── Transport ────────────────────────────────────────────────────
    #[error("Modem request failed: {0}")]
    Ril(#[from] RilError),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("{entity} has been disposed")]
    Disposed { entity: &'static str },

    #[error("{what} is not ready")]
    NotReady { what: &'static str },

    // ── Data ─────────────────────────────────────────────────────────
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Malformed response for EF 0x{ef:04X}: {reason}")]
    MalformedResponse { ef: u16, reason: String },

    // ── Operations ───────────────────────────────────────────────────
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Voicemail number is fixed by the operator")]
    VoicemailFixed,

    #[error("Card has no writable voicemail record")]
    VoicemailUnsupported,

    #[error("Phonebook record mismatch: requested {requested}, modem wrote {written}")]
    RecordIdMismatch { requested: u32, written: u32 },

    #[error("Phonebook capacity is not known")]
    CapacityUnknown,

    #[error("Phonebook load failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    // ── Storage ──────────────────────────────────────────────────────
    #[error("PIN storage error: {message}")]
    Storage { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UiccError {
    /// Remaining attempts reported by a rejected PIN/PUK, if any.
    pub fn attempts_remaining(&self) -> Option<u32> {
        match self {
            Self::Ril(RilError::PasswordIncorrect { attempts_remaining }) => *attempts_remaining,
            _ => None,
        }
    }

    pub(crate) fn actor_gone(entity: &'static str) -> Self {
        Self::Disposed { entity }
    }
}
