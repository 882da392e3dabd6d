//! PLMN lists: PLMN+AccessTechnology records (EF_PLMNwAcT, EF_OPLMNwAcT,
//! EF_HPLMNwAcT), plain 3-byte lists (EF_FPLMN, EF_EHPLMN) and EF_SPDI.

use bitflags::bitflags;
use serde::Serialize;

use super::bcd::{plmn_to_string, string_to_plmn};
use super::tlv::SimTlv;
use super::{CodecError, is_all_ff};

pub const PLMN_BYTES: usize = 3;

const TAG_SPDI: u8 = 0xA3;
const TAG_SPDI_PLMN_LIST: u8 = 0x80;

bitflags! {
    /// Access technology bits (TS 31.102 4.2.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct AccessTech: u16 {
        const UTRAN = 0x8000;
        const EUTRAN = 0x4000;
        const GSM = 0x0080;
        const GSM_COMPACT = 0x0040;
        const HRPD = 0x0020;
        const CDMA_1XRTT = 0x0010;
        const RESERVED = 0x3F0F;
    }
}

/// One PLMN with its access technologies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlmnAct {
    pub plmn: String,
    pub access_techs: AccessTech,
}

impl PlmnAct {
    pub const LEN: usize = 5;

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let &[p0, p1, p2, hi, lo] = data else {
            return Err(CodecError::Length {
                what: "PLMN+AcT record",
                expected: Self::LEN,
                actual: data.len(),
            });
        };
        let plmn = plmn_to_string(&[p0, p1, p2]).unwrap_or_default();
        Ok(Self {
            plmn,
            access_techs: AccessTech::from_bits_retain(u16::from_be_bytes([hi, lo])),
        })
    }

    pub fn encode(&self) -> Result<[u8; 5], CodecError> {
        let [p0, p1, p2] = string_to_plmn(&self.plmn)?;
        let [hi, lo] = self.access_techs.bits().to_be_bytes();
        Ok([p0, p1, p2, hi, lo])
    }
}

/// Decode a PLMN+AcT file, dropping unused (all-`FF`) entries.
pub fn decode_plmn_act_list(data: &[u8]) -> Vec<PlmnAct> {
    data.chunks_exact(PlmnAct::LEN)
        .filter(|chunk| !is_all_ff(&chunk[..PLMN_BYTES]))
        .filter_map(|chunk| PlmnAct::decode(chunk).ok())
        .collect()
}

/// Decode a list of 3-byte PLMNs, dropping blank entries.
pub fn decode_plmn_list(data: &[u8]) -> Vec<String> {
    data.chunks_exact(PLMN_BYTES)
        .filter(|chunk| !is_all_ff(chunk))
        .filter_map(plmn_to_string)
        .filter(|plmn| !plmn.is_empty())
        .collect()
}

/// Encode PLMNs into a file of `size` bytes, padding with `FF`. Entries
/// beyond the file's capacity are dropped.
pub fn encode_plmn_list(plmns: &[String], size: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![0xFF; size];
    for (slot, plmn) in out.chunks_exact_mut(PLMN_BYTES).zip(plmns) {
        slot.copy_from_slice(&string_to_plmn(plmn)?);
    }
    Ok(out)
}

/// EF_SPDI: a 0xA3 template holding a 0x80 PLMN list. Some cards omit the
/// template and put the list at top level.
pub fn decode_spdi(data: &[u8]) -> Vec<String> {
    let inner = SimTlv::find(data, TAG_SPDI).unwrap_or(data);
    SimTlv::find(inner, TAG_SPDI_PLMN_LIST)
        .map(decode_plmn_list)
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plmn_act_round_trips_bytes() {
        let raw = [0x13, 0x00, 0x62, 0xC0, 0x80];
        let record = PlmnAct::decode(&raw).unwrap();
        assert_eq!(record.plmn, "310260");
        assert!(record.access_techs.contains(AccessTech::UTRAN | AccessTech::EUTRAN | AccessTech::GSM));
        assert_eq!(record.encode().unwrap(), raw);
    }

    #[test]
    fn plmn_act_keeps_unknown_bits() {
        let raw = [0x32, 0xF4, 0x01, 0x01, 0x01];
        let record = PlmnAct::decode(&raw).unwrap();
        assert_eq!(record.plmn, "23410");
        assert_eq!(record.encode().unwrap(), raw);
    }

    #[test]
    fn plmn_act_round_trips_every_valid_record() {
        const ACTS: [u16; 7] = [0x0000, 0x8000, 0x4000, 0x0080, 0xC080, 0x0030, 0xFFFF];
        let digit = |n: u32, place: u32| u8::try_from(n / place % 10).unwrap();

        // (mnc value, mnc digits): every 2-digit MNC and a stride of 3-digit ones.
        let mncs = (0..100)
            .map(|m| (m, 2))
            .chain((0..1000).step_by(7).map(|m| (m, 3)));
        let mut checked = 0;
        for (mnc, width) in mncs {
            let (m1, m2, m3) = if width == 2 {
                (digit(mnc, 10), digit(mnc, 1), 0x0F)
            } else {
                (digit(mnc, 100), digit(mnc, 10), digit(mnc, 1))
            };
            for mcc in 0..1000 {
                let (d1, d2, d3) = (digit(mcc, 100), digit(mcc, 10), digit(mcc, 1));
                let [hi, lo] = ACTS[usize::try_from(mcc + mnc).unwrap() % ACTS.len()].to_be_bytes();
                let raw = [(d2 << 4) | d1, (m3 << 4) | d3, (m2 << 4) | m1, hi, lo];

                let record = PlmnAct::decode(&raw).unwrap();
                assert_eq!(record.plmn.len(), 3 + width, "{raw:02X?}");
                assert_eq!(record.encode().unwrap(), raw, "{}", record.plmn);
                checked += 1;
            }
        }
        assert_eq!(checked, (100 + 143) * 1000);
    }

    #[test]
    fn plmn_act_list_skips_blank() {
        let mut data = vec![0x13, 0x00, 0x62, 0x40, 0x00];
        data.extend([0xFF; 5]);
        assert_eq!(decode_plmn_act_list(&data).len(), 1);
        assert!(PlmnAct::decode(&data[..4]).is_err());
    }

    #[test]
    fn fplmn_list_round_trip_with_padding() {
        let plmns = vec!["310260".to_owned(), "23410".to_owned()];
        let encoded = encode_plmn_list(&plmns, 12).unwrap();
        assert_eq!(&encoded[6..], &[0xFF; 6]);
        assert_eq!(decode_plmn_list(&encoded), plmns);
    }

    #[test]
    fn spdi_with_and_without_template() {
        let wrapped = [0xA3, 0x08, 0x80, 0x06, 0x13, 0x00, 0x62, 0x32, 0xF4, 0x01, 0xFF];
        assert_eq!(decode_spdi(&wrapped), vec!["310260", "23410"]);
        let bare = [0x80, 0x03, 0x13, 0x00, 0x62];
        assert_eq!(decode_spdi(&bare), vec!["310260"]);
        assert!(decode_spdi(&[0xFF; 8]).is_empty());
    }
}
