use thiserror::Error;

/// Top-level error type for the `uicc-ril` crate.
///
/// Every failure the modem can report for a request lands here.
/// `uicc-core` wraps these into [`UiccError`](../uicc_core/enum.UiccError.html)
/// before they reach callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RilError {
    // ── Radio ───────────────────────────────────────────────────────
    /// The radio is off or resetting.
    #[error("Radio not available")]
    RadioNotAvailable,

    /// The modem does not implement the request.
    #[error("Request not supported: {request}")]
    RequestNotSupported { request: &'static str },

    /// Catch-all failure reported by the modem.
    #[error("Generic failure: {message}")]
    GenericFailure { message: String },

    // ── Card I/O ────────────────────────────────────────────────────
    /// SIM I/O completed with a non-success status word.
    #[error("SIM I/O failed (sw1=0x{sw1:02X}, sw2=0x{sw2:02X})")]
    SimIo { sw1: u8, sw2: u8 },

    /// No card in the addressed slot.
    #[error("SIM absent")]
    SimAbsent,

    // ── Credentials ─────────────────────────────────────────────────
    /// Wrong PIN/PUK. `attempts_remaining` is `None` when the card does not say.
    #[error("Password incorrect ({attempts_remaining:?} attempts remaining)")]
    PasswordIncorrect { attempts_remaining: Option<u32> },

    /// PIN is blocked; PUK is required.
    #[error("SIM PUK required")]
    PukRequired,

    // ── Arguments / resources ───────────────────────────────────────
    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("No such element: {message}")]
    NoSuchElement { message: String },

    /// Out of logical channels or similar card resource.
    #[error("Missing resource: {message}")]
    MissingResource { message: String },

    /// The transport dropped the request without answering.
    #[error("Request cancelled")]
    Cancelled,
}

impl RilError {
    /// Returns `true` when the card reported that the addressed file does not exist.
    pub fn is_file_not_found(&self) -> bool {
        matches!(
            self,
            Self::SimIo {
                sw1: 0x6A,
                sw2: 0x82
            } | Self::SimIo {
                sw1: 0x94,
                sw2: 0x04
            }
        )
    }

    /// Returns `true` when retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RadioNotAvailable | Self::GenericFailure { .. })
    }

    pub(crate) fn generic(message: impl Into<String>) -> Self {
        Self::GenericFailure {
            message: message.into(),
        }
    }
}
