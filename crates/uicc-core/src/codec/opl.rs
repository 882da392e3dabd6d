//! EF_OPL: operator PLMN list mapping PLMN/LAC ranges to EF_PNN entries.

use serde::Serialize;
use tracing::warn;

use super::CodecError;
use super::bcd::plmn_to_string;

const WILDCARD: char = 'D';
const ANY_LAC_START: u16 = 0x0000;
const ANY_LAC_END: u16 = 0xFFFE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OplRecord {
    /// PLMN pattern; `D` matches any digit.
    pub plmn: String,
    pub lac_tac_start: u16,
    pub lac_tac_end: u16,
    /// 1-based EF_PNN record; 0 means the name comes from elsewhere.
    pub pnn_index: u8,
}

impl OplRecord {
    pub const LEN: usize = 8;

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let &[p0, p1, p2, s_hi, s_lo, e_hi, e_lo, pnn_index] = data else {
            return Err(CodecError::Length {
                what: "EF_OPL record",
                expected: Self::LEN,
                actual: data.len(),
            });
        };
        let plmn = plmn_to_string(&[p0, p1, p2]).unwrap_or_default();
        if plmn.len() < 5 {
            return Err(CodecError::malformed("EF_OPL record", "blank PLMN"));
        }
        Ok(Self {
            plmn,
            lac_tac_start: u16::from_be_bytes([s_hi, s_lo]),
            lac_tac_end: u16::from_be_bytes([e_hi, e_lo]),
            pnn_index,
        })
    }

    /// Whether this entry covers `plmn` at `lac` (unknown LAC only matches
    /// the catch-all range).
    pub fn matches(&self, plmn: &str, lac: Option<u16>) -> bool {
        if self.plmn.len() != plmn.len()
            || !self
                .plmn
                .chars()
                .zip(plmn.chars())
                .all(|(p, c)| p == WILDCARD || p == c)
        {
            return false;
        }
        let any = self.lac_tac_start == ANY_LAC_START && self.lac_tac_end == ANY_LAC_END;
        any || lac.is_some_and(|lac| (self.lac_tac_start..=self.lac_tac_end).contains(&lac))
    }
}

/// Decode every record, dropping (and logging) malformed ones.
pub fn decode_opl_records(records: &[Vec<u8>]) -> Vec<OplRecord> {
    records
        .iter()
        .filter(|r| !super::is_all_ff(r))
        .filter_map(|r| match OplRecord::decode(r) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "dropping EF_OPL record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_record() {
        let rec = OplRecord::decode(&[0x13, 0x00, 0x62, 0x00, 0x00, 0xFF, 0xFE, 0x01]).unwrap();
        assert_eq!(rec.plmn, "310260");
        assert_eq!(rec.pnn_index, 1);
        assert!(rec.matches("310260", None));
        assert!(!rec.matches("310410", Some(7)));
    }

    #[test]
    fn wildcard_and_lac_range() {
        let rec = OplRecord::decode(&[0x13, 0x00, 0xD2, 0x00, 0x10, 0x00, 0x20, 0x02]).unwrap();
        assert_eq!(rec.plmn, "3102D0");
        assert!(rec.matches("310260", Some(0x0015)));
        assert!(!rec.matches("310260", Some(0x0030)));
        assert!(!rec.matches("310260", None));
    }

    #[test]
    fn wrong_length_records_are_dropped() {
        let records = vec![
            vec![0x13, 0x00, 0x62, 0x00, 0x00, 0xFF, 0xFE],
            vec![0x13, 0x00, 0x62, 0x00, 0x00, 0xFF, 0xFE, 0x01],
            vec![0xFF; 8],
        ];
        assert_eq!(decode_opl_records(&records).len(), 1);
    }
}
