//! 3GPP2 file formats: IMSI_M (C.S0065 5.2.2 with C.S0005 2.3.1 digit
//! coding), MDN, home SID/NID, PRL version, CSIM SPN, language list and
//! the Mobile IP NAI.

use serde::Serialize;

use super::CodecError;
use super::bcd::cdma_bcd_to_string;
use super::text::{ascii_or_gsm7, latin1_to_string, unpack_gsm7, utf16_to_string};

const IMSI_M_LEN: usize = 10;
const CSIM_SPN_MAX_NAME: usize = 32;

// C.S0015 user-data encodings carried in EF_CSIM_SPN byte 2.
const ENCODING_OCTET: u8 = 0x00;
const ENCODING_7BIT_ASCII: u8 = 0x02;
const ENCODING_IA5: u8 = 0x03;
const ENCODING_UNICODE_16: u8 = 0x04;
const ENCODING_LATIN: u8 = 0x08;
const ENCODING_GSM_7BIT: u8 = 0x09;

/// Undo the "add 1 to each digit, 0 coded as 10" packing of `len` digits.
fn decode_min_digits(value: u32, len: u32) -> u32 {
    let constant: u32 = (0..len).fold(0, |acc, _| acc * 10 + 1);
    let mut digits = value + constant;
    let mut denominator = 1;
    for _ in 0..len {
        if (digits / denominator) % 10 == 0 {
            digits -= 10 * denominator;
        }
        denominator *= 10;
    }
    digits
}

/// Decoded EF_CSIM_IMSIM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImsiM {
    pub imsi: String,
    /// Mobile identification number: the ten digits after MCC and MNC.
    pub min: String,
}

/// Decode EF_CSIM_IMSIM. Returns `Ok(None)` when the IMSI_M is not
/// provisioned.
pub fn decode_imsi_m(data: &[u8]) -> Result<Option<ImsiM>, CodecError> {
    if data.len() < IMSI_M_LEN {
        return Err(CodecError::Length {
            what: "EF_CSIM_IMSIM",
            expected: IMSI_M_LEN,
            actual: data.len(),
        });
    }
    if data[7] & 0x80 == 0 {
        return Ok(None);
    }
    let b = |i: usize| u32::from(data[i]);

    let mcc = decode_min_digits(((b(9) & 0x03) << 8) | b(8), 3);
    let digits_11_12 = decode_min_digits(b(6) & 0x7F, 2);
    let first3 = decode_min_digits(((b(2) & 0x03) << 8) | b(1), 3);
    let second3 = decode_min_digits(((b(5) << 8) | b(4)) >> 6, 3);
    let mut digit7 = (b(4) >> 2) & 0x0F;
    if digit7 > 9 {
        digit7 = 0;
    }
    let last3 = decode_min_digits(((b(4) & 0x03) << 8) | b(3), 3);

    let imsi = format!("{mcc:03}{digits_11_12:02}{first3:03}{second3:03}{digit7}{last3:03}");
    let min = imsi.get(5..15).unwrap_or_default().to_owned();
    Ok(Some(ImsiM { imsi, min }))
}

/// EF_CSIM_MDN: digit count in the low nibble of byte 0, CDMA BCD after.
pub fn decode_mdn(data: &[u8]) -> Option<String> {
    let (&count, digits) = data.split_first()?;
    let mdn = cdma_bcd_to_string(digits, usize::from(count & 0x0F));
    (!mdn.is_empty()).then_some(mdn)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HomeSystem {
    pub sid: u16,
    pub nid: u16,
}

/// EF_CSIM_CDMAHOME records (5 bytes each); other lengths are skipped.
pub fn decode_cdma_home(records: &[Vec<u8>]) -> Vec<HomeSystem> {
    records
        .iter()
        .filter_map(|r| match r.as_slice() {
            &[s_lo, s_hi, n_lo, n_hi, _] => Some(HomeSystem {
                sid: u16::from_le_bytes([s_lo, s_hi]),
                nid: u16::from_le_bytes([n_lo, n_hi]),
            }),
            _ => None,
        })
        .collect()
}

/// PRL version from the first bytes of EF_CSIM_EPRL.
pub fn decode_prl_version(data: &[u8]) -> Option<u16> {
    match data {
        [_, _, hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Decoded EF_CSIM_SPN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsimSpn {
    pub name: String,
    /// Show the SPN while roaming.
    pub display_condition: bool,
}

pub fn decode_csim_spn(data: &[u8]) -> Result<CsimSpn, CodecError> {
    let &[condition, encoding, _language, ref rest @ ..] = data else {
        return Err(CodecError::Length {
            what: "EF_CSIM_SPN",
            expected: 3,
            actual: data.len(),
        });
    };
    let body = &rest[..rest.len().min(CSIM_SPN_MAX_NAME)];
    let len = body.iter().position(|&b| b == 0xFF).unwrap_or(body.len());
    let body = &body[..len];
    let name = match encoding {
        _ if body.is_empty() => String::new(),
        ENCODING_OCTET | ENCODING_LATIN => latin1_to_string(body),
        ENCODING_IA5 | ENCODING_GSM_7BIT => unpack_gsm7(body, body.len() * 8 / 7, 0),
        ENCODING_7BIT_ASCII => ascii_or_gsm7(body),
        ENCODING_UNICODE_16 => utf16_to_string(body),
        other => {
            return Err(CodecError::UnsupportedEncoding {
                what: "EF_CSIM_SPN",
                encoding: other,
            });
        }
    };
    Ok(CsimSpn {
        name,
        display_condition: condition & 0x01 != 0,
    })
}

/// Map EF_CSIM_LI language codes (C.S0065 5.2.26) onto two-letter ISO
/// codes laid out like EF_LI.
pub fn csim_li_to_iso(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2)
        .flat_map(|pair| match pair[1] {
            0x01 => *b"en",
            0x02 => *b"fr",
            0x03 => *b"es",
            0x04 => *b"ja",
            0x05 => *b"ko",
            0x06 => *b"zh",
            0x07 => *b"he",
            _ => *b"  ",
        })
        .collect()
}

/// MSB-first bit reader over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl BitReader<'_> {
    fn read(&mut self, bits: usize) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..bits {
            let byte = *self.data.get(self.pos / 8)?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.pos += 1;
        }
        Some(value)
    }

    fn skip(&mut self, bits: usize) -> Option<()> {
        self.pos += bits;
        (self.pos <= self.data.len() * 8).then_some(())
    }
}

/// Mobile IP user profile (EF_CSIM_MIPUPP, C.S0016 3.5.8.6): the NAI of
/// the first profile entry. Byte 0 is the length of the bit-packed body.
pub fn decode_mip_upp_nai(data: &[u8]) -> Option<String> {
    let (&len, body) = data.split_first()?;
    let body = body.get(..usize::from(len)).unwrap_or(body);
    let mut bits = BitReader { data: body, pos: 0 };
    if bits.read(1)? == 1 {
        // MAX_NUM_RETRY, MIP_FIRST_RETRY_INT, MIP_RETRY_INT
        bits.skip(2 + 4 + 4)?;
    }
    if bits.read(3)? == 0 {
        return None;
    }
    let _index = bits.read(4)?;
    let nai_len = usize::try_from(bits.read(8)?).ok()?;
    let nai: Vec<u8> = (0..nai_len)
        .map(|_| bits.read(8).and_then(|b| u8::try_from(b).ok()))
        .collect::<Option<_>>()?;
    let nai = String::from_utf8_lossy(&nai).into_owned();
    (!nai.is_empty()).then_some(nai)
}
