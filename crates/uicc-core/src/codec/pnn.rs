//! EF_PNN: PLMN network names (TS 31.102 4.2.58, TS 24.008 10.5.3.5a).

use serde::Serialize;

use super::CodecError;
use super::text::{unpack_gsm7, utf16_to_string};
use super::tlv::SimTlv;

const TAG_FULL_NAME: u8 = 0x43;
const TAG_SHORT_NAME: u8 = 0x45;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PnnRecord {
    pub full_name: Option<String>,
    pub short_name: Option<String>,
}

impl PnnRecord {
    pub fn decode(data: &[u8]) -> Self {
        let mut record = Self::default();
        for tlv in SimTlv::new(data) {
            let name = network_name_to_string(tlv.value)
                .ok()
                .filter(|n| !n.is_empty());
            match tlv.tag {
                TAG_FULL_NAME if record.full_name.is_none() => record.full_name = name,
                TAG_SHORT_NAME if record.short_name.is_none() => record.short_name = name,
                _ => {}
            }
        }
        record
    }

    /// Full name, else short name.
    pub fn name(&self) -> Option<&str> {
        self.full_name.as_deref().or(self.short_name.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.short_name.is_none()
    }
}

/// Decode a network-name value: one coding-scheme octet followed by the text.
pub fn network_name_to_string(data: &[u8]) -> Result<String, CodecError> {
    let Some((&scheme, text)) = data.split_first() else {
        return Ok(String::new());
    };
    if scheme & 0x80 == 0 {
        return Err(CodecError::malformed(
            "network name",
            "extension bit not set",
        ));
    }
    match (scheme >> 4) & 0x07 {
        0 => {
            let spare_bits = usize::from(scheme & 0x07);
            let septets = (text.len() * 8).saturating_sub(spare_bits) / 7;
            Ok(unpack_gsm7(text, septets, 0))
        }
        1 => Ok(utf16_to_string(text)),
        other => Err(CodecError::UnsupportedEncoding {
            what: "network name",
            encoding: other,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn full_and_short_names() {
        let data = [
            0x43, 0x06, 0x85, 0xE8, 0x32, 0x9B, 0xFD, 0x06, // full "hello"
            0x45, 0x05, 0x90, 0x00, 0x48, 0x00, 0x69, // short "Hi"
            0xFF, 0xFF,
        ];
        let record = PnnRecord::decode(&data);
        assert_eq!(record.full_name.as_deref(), Some("hello"));
        assert_eq!(record.short_name.as_deref(), Some("Hi"));
        assert_eq!(record.name(), Some("hello"));
    }

    #[test]
    fn short_name_only() {
        let record = PnnRecord::decode(&[0x45, 0x05, 0x90, 0x00, 0x48, 0x00, 0x69]);
        assert_eq!(record.name(), Some("Hi"));
    }

    #[test]
    fn blank_record() {
        assert!(PnnRecord::decode(&[0xFF; 16]).is_empty());
        assert!(network_name_to_string(&[0x05, 0x41]).is_err());
    }
}
