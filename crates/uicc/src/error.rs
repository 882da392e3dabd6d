//! CLI error types with miette diagnostics.
//!
//! Maps `UiccError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use uicc_config::ConfigError;
use uicc_core::UiccError;
use uicc_ril::RilError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CARD: i32 = 5;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Setup ────────────────────────────────────────────────────────
    #[error("No card images given")]
    #[diagnostic(
        code(uicc::no_images),
        help(
            "Pass one with --image <file>, or list them under `images` in\n\
             the config file ({path})."
        )
    )]
    NoImages { path: String },

    #[error("Could not load card image {path}")]
    #[diagnostic(code(uicc::image))]
    Image {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Phone {phone} has no card")]
    #[diagnostic(
        code(uicc::no_card),
        help("Run: uicc status to see which phones have a card")
    )]
    NoCard { phone: usize },

    // ── Credentials ──────────────────────────────────────────────────
    #[error("Incorrect PIN or PUK ({remaining} attempts left)")]
    #[diagnostic(code(uicc::password_incorrect))]
    PasswordIncorrect { remaining: String },

    #[error("PIN is blocked")]
    #[diagnostic(
        code(uicc::puk_required),
        help("Unblock with: uicc unlock --puk <puk> --pin <new pin>")
    )]
    PukRequired,

    // ── Card ─────────────────────────────────────────────────────────
    #[error("Card request failed: {0}")]
    #[diagnostic(code(uicc::card))]
    Card(#[source] UiccError),

    #[error("{what} is not ready")]
    #[diagnostic(
        code(uicc::not_ready),
        help("The card may still be locked. Run: uicc status")
    )]
    NotReady { what: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(uicc::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(uicc::config))]
    Config(#[from] ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Cards did not settle within {seconds}s")]
    #[diagnostic(
        code(uicc::timeout),
        help("Increase the wait with --timeout, or check the image with -vv.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PasswordIncorrect { .. } | Self::PukRequired => exit_code::AUTH,
            Self::NoCard { .. } => exit_code::NOT_FOUND,
            Self::Card(_) | Self::NotReady { .. } => exit_code::CARD,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NoImages { .. } | Self::Image { .. } | Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── UiccError → CliError mapping ─────────────────────────────────────

impl From<UiccError> for CliError {
    fn from(err: UiccError) -> Self {
        match err {
            UiccError::Ril(RilError::PasswordIncorrect { attempts_remaining }) => {
                Self::PasswordIncorrect {
                    remaining: attempts_remaining.map_or_else(|| "unknown".into(), |n| n.to_string()),
                }
            }
            UiccError::Ril(RilError::PukRequired) => Self::PukRequired,
            UiccError::NotReady { what } => Self::NotReady { what: what.into() },
            UiccError::InvalidArgument { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            UiccError::Timeout { timeout_ms } => Self::Timeout {
                seconds: timeout_ms.div_ceil(1000),
            },
            other => Self::Card(other),
        }
    }
}
