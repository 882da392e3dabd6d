// ── SIM I/O and APDU envelopes ──

use serde::{Deserialize, Serialize};

use crate::error::RilError;

// ISO 7816-4 / TS 51.011 instruction bytes used by the EF layer.
pub const COMMAND_READ_BINARY: u8 = 0xB0;
pub const COMMAND_UPDATE_BINARY: u8 = 0xD6;
pub const COMMAND_READ_RECORD: u8 = 0xB2;
pub const COMMAND_UPDATE_RECORD: u8 = 0xDC;
pub const COMMAND_SEEK: u8 = 0xA2;
pub const COMMAND_GET_RESPONSE: u8 = 0xC0;

/// P2 for READ/UPDATE RECORD: absolute record number in P1.
pub const READ_RECORD_MODE_ABSOLUTE: u8 = 0x04;

/// Length of the GET RESPONSE header requested for an EF.
pub const GET_RESPONSE_EF_SIZE_BYTES: u8 = 15;

// Offsets into the GET RESPONSE header.
pub const RESPONSE_DATA_FILE_SIZE_1: usize = 2;
pub const RESPONSE_DATA_FILE_SIZE_2: usize = 3;
pub const RESPONSE_DATA_FILE_TYPE: usize = 6;
pub const RESPONSE_DATA_STRUCTURE: usize = 13;
pub const RESPONSE_DATA_RECORD_LENGTH: usize = 14;

pub const TYPE_EF: u8 = 4;
pub const EF_TYPE_TRANSPARENT: u8 = 0;
pub const EF_TYPE_LINEAR_FIXED: u8 = 1;
pub const EF_TYPE_CYCLIC: u8 = 3;

/// A single SIM I/O request (`+CRSM`-style).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IccIoRequest {
    pub command: u8,
    pub file_id: u16,
    /// Path of the parent DF, hex (e.g. `"3F007F20"`).
    pub path: String,
    pub p1: u8,
    pub p2: u8,
    pub p3: u8,
    pub data: Option<Vec<u8>>,
    pub pin2: Option<String>,
    pub aid: Option<String>,
}

/// Response to SIM I/O or an APDU: status words plus payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IccIoResult {
    pub sw1: u8,
    pub sw2: u8,
    pub payload: Vec<u8>,
}

impl IccIoResult {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            sw1: 0x90,
            sw2: 0x00,
            payload,
        }
    }

    pub fn status(sw1: u8, sw2: u8) -> Self {
        Self {
            sw1,
            sw2,
            payload: Vec::new(),
        }
    }

    /// Normal-ending status words (`90 00`, `91 xx`, `9E xx`, `9F xx`).
    pub fn success(&self) -> bool {
        matches!(self.sw1, 0x90 | 0x91 | 0x9E | 0x9F)
    }

    /// Turn a non-success status into [`RilError::SimIo`], yielding the payload otherwise.
    pub fn into_payload(self) -> Result<Vec<u8>, RilError> {
        if self.success() {
            Ok(self.payload)
        } else {
            Err(RilError::SimIo {
                sw1: self.sw1,
                sw2: self.sw2,
            })
        }
    }
}

/// Command APDU for logical/basic channel transmission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub p3: u8,
    pub data: Vec<u8>,
}

/// Result of opening a logical channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub channel: i32,
    /// SELECT response including trailing status words.
    pub select_response: Vec<u8>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_words() {
        assert!(IccIoResult::ok(vec![1]).success());
        assert!(IccIoResult::status(0x91, 0x10).success());
        assert!(!IccIoResult::status(0x6A, 0x82).success());
    }

    #[test]
    fn into_payload_maps_failure() {
        let err = IccIoResult::status(0x6A, 0x82).into_payload().unwrap_err();
        assert!(err.is_file_not_found());
        assert_eq!(IccIoResult::ok(vec![7, 8]).into_payload().unwrap(), vec![7, 8]);
    }
}
