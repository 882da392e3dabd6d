//! Abbreviated dialling number records (TS 51.011 10.5.1) and their
//! extension records (10.5.10). Also used for EF_MSISDN, EF_MBDN, EF_FDN
//! and the CPHS mailbox.

use serde::Serialize;

use super::CodecError;
use super::bcd::{called_party_fragment, called_party_to_string, number_to_called_party};
use super::text::{adn_alpha_to_string, string_to_adn_alpha};

/// Bytes after the alpha identifier.
pub const FOOTER_SIZE_BYTES: usize = 14;
/// TON/NPI plus ten digit octets.
const MAX_NUMBER_SIZE_BYTES: usize = 11;
const EXT_RECORD_LENGTH_BYTES: usize = 13;
const EXT_RECORD_TYPE_ADDITIONAL_DATA: u8 = 0x02;
const MAX_EXT_CALLED_PARTY_LENGTH: usize = 0x0A;

// Footer offsets.
const ADN_BCD_NUMBER_LENGTH: usize = 0;
const ADN_TON_AND_NPI: usize = 1;
const ADN_CAPABILITY_ID: usize = 12;
const ADN_EXTENSION_ID: usize = 13;

pub const NO_EXTENSION: u8 = 0xFF;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdnRecord {
    pub ef: u16,
    pub record_number: u32,
    pub alpha_tag: String,
    pub number: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    /// Extension record chained from this one, if any.
    #[serde(skip)]
    pub extension_record: Option<u8>,
}

impl AdnRecord {
    pub fn new(alpha_tag: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            alpha_tag: alpha_tag.into(),
            number: number.into(),
            ..Self::default()
        }
    }

    /// Decode one record. Records too short to hold the footer are
    /// rejected; a number length beyond the field reads as no number.
    pub fn decode(ef: u16, record_number: u32, data: &[u8]) -> Result<Self, CodecError> {
        let Some(footer_offset) = data.len().checked_sub(FOOTER_SIZE_BYTES) else {
            return Err(CodecError::Length {
                what: "ADN record",
                expected: FOOTER_SIZE_BYTES,
                actual: data.len(),
            });
        };
        let footer = &data[footer_offset..];
        let alpha_tag = adn_alpha_to_string(&data[..footer_offset]);

        let number_len = usize::from(footer[ADN_BCD_NUMBER_LENGTH]);
        let number = if number_len == 0 || number_len > MAX_NUMBER_SIZE_BYTES {
            String::new()
        } else {
            called_party_to_string(&footer[ADN_TON_AND_NPI..ADN_TON_AND_NPI + number_len])
        };
        let extension_record =
            Some(footer[ADN_EXTENSION_ID]).filter(|&e| e != NO_EXTENSION && e != 0);

        Ok(Self {
            ef,
            record_number,
            alpha_tag,
            number,
            emails: Vec::new(),
            extension_record: if number_len > 0 && number_len <= MAX_NUMBER_SIZE_BYTES {
                extension_record
            } else {
                None
            },
        })
    }

    /// Append the digits held by an extension record. Returns the next
    /// record in the chain.
    pub fn append_extension(&mut self, ext: &[u8]) -> Option<u8> {
        if ext.len() != EXT_RECORD_LENGTH_BYTES || ext[0] & 0x03 != EXT_RECORD_TYPE_ADDITIONAL_DATA
        {
            return None;
        }
        let len = usize::from(ext[1]);
        if len > MAX_EXT_CALLED_PARTY_LENGTH {
            return None;
        }
        self.number.push_str(&called_party_fragment(&ext[2..2 + len]));
        Some(ext[EXT_RECORD_LENGTH_BYTES - 1]).filter(|&e| e != NO_EXTENSION && e != 0)
    }

    /// Encode into a record of `record_size` bytes. Numbers needing an
    /// extension record are rejected.
    pub fn encode(&self, record_size: usize) -> Result<Vec<u8>, CodecError> {
        let Some(footer_offset) = record_size.checked_sub(FOOTER_SIZE_BYTES) else {
            return Err(CodecError::Length {
                what: "ADN record",
                expected: FOOTER_SIZE_BYTES,
                actual: record_size,
            });
        };
        let mut out = vec![0xFF; record_size];
        if !self.alpha_tag.is_empty() {
            let alpha = string_to_adn_alpha(&self.alpha_tag, footer_offset)?;
            out[..footer_offset].copy_from_slice(&alpha);
        }
        if !self.number.is_empty() {
            let bcd = number_to_called_party(&self.number)?;
            if bcd.len() > MAX_NUMBER_SIZE_BYTES {
                return Err(CodecError::Overflow {
                    what: "ADN number",
                    reason: format!("{} digits need an extension record", self.number.len()),
                });
            }
            let footer = &mut out[footer_offset..];
            footer[ADN_BCD_NUMBER_LENGTH] = u8::try_from(bcd.len()).unwrap_or(u8::MAX);
            footer[ADN_TON_AND_NPI..ADN_TON_AND_NPI + bcd.len()].copy_from_slice(&bcd);
            footer[ADN_CAPABILITY_ID] = 0xFF;
            footer[ADN_EXTENSION_ID] = NO_EXTENSION;
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.alpha_tag.is_empty() && self.number.is_empty() && self.emails.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_decode_alpha_and_number() {
        let adn = AdnRecord::new("Voicemail", "+15551234");
        let bytes = adn.encode(28).unwrap();
        assert_eq!(bytes.len(), 28);
        let back = AdnRecord::decode(0x6F17, 1, &bytes).unwrap();
        assert_eq!(back.alpha_tag, "Voicemail");
        assert_eq!(back.number, "+15551234");
        assert_eq!(back.extension_record, None);
    }

    #[test]
    fn blank_record_is_empty() {
        let back = AdnRecord::decode(0x6F3A, 3, &[0xFF; 30]).unwrap();
        assert!(back.is_empty());
        assert!(AdnRecord::decode(0x6F3A, 3, &[0xFF; 10]).is_err());
    }

    #[test]
    fn extension_digits_are_appended() {
        let too_long = AdnRecord::new("", "123456789012345678901").encode(14).unwrap_err();
        assert!(matches!(too_long, CodecError::Overflow { .. }));

        let mut record = vec![0xFF; 14];
        record[0] = 11;
        record[1] = 0x81;
        record[2..12].copy_from_slice(&[0x21; 10]);
        record[13] = 0x01;
        let mut adn = AdnRecord::decode(0x6F3A, 1, &record).unwrap();
        assert_eq!(adn.extension_record, Some(1));

        let mut ext = vec![0xFF; 13];
        ext[0] = 0x02;
        ext[1] = 0x02;
        ext[2] = 0x43;
        ext[3] = 0x65;
        assert_eq!(adn.append_extension(&ext), None);
        assert_eq!(adn.number, format!("{}3456", "12".repeat(10)));
    }

    #[test]
    fn alpha_too_long_is_rejected() {
        assert!(AdnRecord::new("A very long name", "1").encode(18).is_err());
    }
}
