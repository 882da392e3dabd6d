// ── Answer-to-reset ──
//
// Just enough of ISO/IEC 7816-3 to pull card capabilities out of an ATR:
// the global (T=15) interface bytes for voltage class and eUICC support,
// and the compact-TLV historical bytes for extended-length APDUs.

use bitflags::bitflags;
use serde::Serialize;

use crate::codec::CodecError;

const TS_DIRECT: u8 = 0x3B;
const TS_INVERSE: u8 = 0x3F;
const PROTOCOL_GLOBAL: u8 = 0x0F;
const CATEGORY_COMPACT_TLV: u8 = 0x80;
const TAG_CARD_CAPABILITIES: u8 = 0x07;
const EXTENDED_LENGTH: u8 = 0x40;
/// b8 and b2 of the first T=15 TB.
const EUICC_MASK: u8 = 0x82;

bitflags! {
    /// Supply voltage classes a card accepts (T=15 TA, bits 1-3).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct VoltageClasses: u8 {
        const A = 0x01;
        const B = 0x02;
        const C = 0x04;
    }
}

/// Lowest supply voltage a card supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageClass {
    /// 5 V.
    A,
    /// 3 V.
    B,
    /// 1.8 V.
    C,
}

/// Capabilities derived from one ATR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerToReset {
    pub raw: Vec<u8>,
    pub voltage_classes: VoltageClasses,
    pub is_euicc: bool,
    pub extended_apdu: bool,
    pub historical: Vec<u8>,
}

impl AnswerToReset {
    /// Parse a hex-encoded ATR.
    pub fn parse(atr: &str) -> Result<Self, CodecError> {
        let raw = hex::decode(atr.trim())
            .map_err(|e| CodecError::malformed("ATR", format!("not hex: {e}")))?;
        Self::from_bytes(raw)
    }

    pub fn from_bytes(raw: Vec<u8>) -> Result<Self, CodecError> {
        let mut reader = Reader::new(&raw);
        let ts = reader.next("TS")?;
        if ts != TS_DIRECT && ts != TS_INVERSE {
            return Err(CodecError::malformed("ATR", format!("bad TS 0x{ts:02X}")));
        }
        let t0 = reader.next("T0")?;
        let historical_len = usize::from(t0 & 0x0F);

        let mut voltage_classes = VoltageClasses::empty();
        let mut is_euicc = false;
        let mut seen_global_tb = false;
        let mut needs_tck = false;
        let mut indicator = t0;
        // Protocol the current group of interface bytes belongs to; the
        // first group is global and only TD1 names a protocol.
        let mut protocol: Option<u8> = None;

        loop {
            let ta = (indicator & 0x10 != 0).then(|| reader.next("TA")).transpose()?;
            let tb = (indicator & 0x20 != 0).then(|| reader.next("TB")).transpose()?;
            let _tc = (indicator & 0x40 != 0).then(|| reader.next("TC")).transpose()?;
            let td = (indicator & 0x80 != 0).then(|| reader.next("TD")).transpose()?;

            if protocol == Some(PROTOCOL_GLOBAL) {
                if let Some(ta) = ta {
                    voltage_classes = VoltageClasses::from_bits_truncate(ta & 0x3F);
                }
                if let Some(tb) = tb.filter(|_| !seen_global_tb) {
                    is_euicc = tb & EUICC_MASK == EUICC_MASK;
                    seen_global_tb = true;
                }
            }

            let Some(td) = td else { break };
            let t = td & 0x0F;
            if t != 0 {
                needs_tck = true;
            }
            protocol = Some(t);
            indicator = td;
        }

        let historical = reader.take(historical_len, "historical bytes")?.to_vec();
        let extended_apdu = extended_length_supported(&historical);

        if needs_tck {
            reader.next("TCK")?;
            let check = raw.iter().skip(1).fold(0u8, |acc, b| acc ^ b);
            if check != 0 {
                return Err(CodecError::malformed("ATR", "TCK mismatch"));
            }
        }
        if reader.remaining() != 0 {
            return Err(CodecError::malformed(
                "ATR",
                format!("{} trailing bytes", reader.remaining()),
            ));
        }

        Ok(Self {
            raw,
            voltage_classes,
            is_euicc,
            extended_apdu,
            historical,
        })
    }

    /// Lowest voltage class the card declares, if it declares any.
    pub fn min_voltage_class(&self) -> Option<VoltageClass> {
        if self.voltage_classes.contains(VoltageClasses::C) {
            Some(VoltageClass::C)
        } else if self.voltage_classes.contains(VoltageClasses::B) {
            Some(VoltageClass::B)
        } else if self.voltage_classes.contains(VoltageClasses::A) {
            Some(VoltageClass::A)
        } else {
            None
        }
    }
}

/// Card capabilities (compact-TLV tag 7), third byte, bit 7.
fn extended_length_supported(historical: &[u8]) -> bool {
    let Some((&category, mut rest)) = historical.split_first() else {
        return false;
    };
    if category != CATEGORY_COMPACT_TLV {
        return false;
    }
    while let Some((&header, tail)) = rest.split_first() {
        let tag = header >> 4;
        let len = usize::from(header & 0x0F);
        let Some(value) = tail.get(..len) else {
            return false;
        };
        if tag == TAG_CARD_CAPABILITIES {
            return value.get(2).is_some_and(|b| b & EXTENDED_LENGTH != 0);
        }
        rest = &tail[len..];
    }
    false
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next(&mut self, what: &'static str) -> Result<u8, CodecError> {
        let b = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| CodecError::malformed("ATR", format!("missing {what}")))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| CodecError::malformed("ATR", format!("short {what}")))?;
        self.pos += len;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Appends a valid TCK to `hex_without_tck`.
    fn with_tck(hex_without_tck: &str) -> String {
        let bytes = hex::decode(hex_without_tck).unwrap();
        let tck = bytes.iter().skip(1).fold(0u8, |acc, b| acc ^ b);
        format!("{hex_without_tck}{tck:02X}")
    }

    #[test]
    fn euicc_atr_with_class_c_and_extended_apdu() {
        // TD1 -> T=0, TD2 -> T=15 with TA (classes B|C) and TB (b8|b2).
        // Historical: 80, tag 7 len 3 = 73 21 C0 40.
        let parsed = AnswerToReset::parse(&with_tck("3B9596803F0682807321C040")).unwrap();
        assert!(parsed.is_euicc);
        assert!(parsed.extended_apdu);
        assert_eq!(parsed.voltage_classes, VoltageClasses::B | VoltageClasses::C);
        assert_eq!(parsed.min_voltage_class(), Some(VoltageClass::C));
    }

    #[test]
    fn extended_length_from_card_capabilities() {
        assert!(extended_length_supported(&[0x80, 0x73, 0x21, 0xC0, 0x40]));
        assert!(!extended_length_supported(&[0x80, 0x73, 0x21, 0xC0, 0x00]));
        assert!(!extended_length_supported(&[0x00, 0x73, 0x21, 0xC0, 0x40]));
        // Truncated object.
        assert!(!extended_length_supported(&[0x80, 0x73, 0x21]));
    }

    #[test]
    fn plain_t0_atr_has_no_tck() {
        // T0 = 0x02: no interface bytes, two historical bytes.
        let parsed = AnswerToReset::parse("3B021234").unwrap();
        assert!(!parsed.is_euicc);
        assert!(parsed.min_voltage_class().is_none());
        assert_eq!(parsed.historical, vec![0x12, 0x34]);
    }

    #[test]
    fn bad_ts_is_rejected() {
        assert!(AnswerToReset::parse("3A00").is_err());
    }

    #[test]
    fn wrong_tck_is_rejected() {
        // TD1 = 0x01 (T=1) requires TCK.
        assert!(AnswerToReset::parse(&with_tck("3B8001")).is_ok());
        assert!(AnswerToReset::parse("3B8001FF").is_err());
    }

    #[test]
    fn non_euicc_global_tb() {
        // TD1 -> T=15 with TB = 0x02 only.
        let parsed = AnswerToReset::parse(&with_tck("3B802F02")).unwrap();
        assert!(!parsed.is_euicc);
    }
}
