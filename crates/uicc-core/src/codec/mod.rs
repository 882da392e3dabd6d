//! Pure decoders and encoders for elementary-file contents.
//!
//! Nothing here performs I/O or holds state. Parse failures surface as
//! [`CodecError`]; callers log them and leave the field unset.

pub mod adn;
pub mod bcd;
pub mod cdma;
pub mod mcc;
pub mod opl;
pub mod plmn;
pub mod pnn;
pub mod text;
pub mod tlv;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("{what}: expected {expected} bytes, got {actual}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("{what}: unsupported encoding 0x{encoding:02X}")]
    UnsupportedEncoding { what: &'static str, encoding: u8 },

    #[error("{what}: value does not fit ({reason})")]
    Overflow { what: &'static str, reason: String },
}

impl CodecError {
    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

pub(crate) fn is_all_ff(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0xFF)
}
