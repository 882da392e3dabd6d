//! Binary-coded decimal as used by EF_ICCID, EF_IMSI, PLMN triplets and
//! called-party numbers (TS 24.008 10.5.4.7).

use super::CodecError;

/// Type-of-number/numbering-plan byte for international numbers.
pub const TOA_INTERNATIONAL: u8 = 0x91;
/// Type-of-number/numbering-plan byte for unknown/national numbers.
pub const TOA_UNKNOWN: u8 = 0x81;

const MAX_IMSI_BYTES: usize = 8;

fn nibbles(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.iter().flat_map(|b| [b & 0x0F, b >> 4])
}

fn hex_digit(n: u8) -> char {
    char::from_digit(u32::from(n), 16).map_or('?', |c| c.to_ascii_uppercase())
}

/// Decimal digits, low nibble first. Stops at the first nibble above 9;
/// an `F` high nibble is skipped as filler.
pub fn bcd_to_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for &b in data {
        let low = b & 0x0F;
        if low > 9 {
            break;
        }
        out.push(hex_digit(low));
        let high = b >> 4;
        if high == 0x0F {
            continue;
        }
        if high > 9 {
            break;
        }
        out.push(hex_digit(high));
    }
    out
}

/// Every nibble, low first, as uppercase hex. Keeps filler and any
/// non-decimal digits (the "full" ICCID form).
pub fn bcd_to_hex_string(data: &[u8]) -> String {
    nibbles(data).map(hex_digit).collect()
}

/// 3GPP2 BCD: exactly `digits` digits where any nibble above 9 reads as 0.
pub fn cdma_bcd_to_string(data: &[u8], digits: usize) -> String {
    nibbles(data)
        .take(digits)
        .map(|n| if n > 9 { '0' } else { hex_digit(n) })
        .collect()
}

/// Decode EF_IMSI: a length byte, then BCD digits whose first nibble is
/// the parity/identity-type indicator.
pub fn imsi_from_ef(data: &[u8]) -> Result<String, CodecError> {
    let Some((&len, rest)) = data.split_first() else {
        return Err(CodecError::Length {
            what: "EF_IMSI",
            expected: 2,
            actual: 0,
        });
    };
    let len = usize::from(len);
    if len == 0 || len > MAX_IMSI_BYTES || len > rest.len() {
        return Err(CodecError::malformed(
            "EF_IMSI",
            format!("invalid length byte {len}"),
        ));
    }
    let digits: String = nibbles(&rest[..len])
        .skip(1)
        .take_while(|&n| n != 0x0F)
        .map(hex_digit)
        .collect();
    if digits.len() < 6 || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return Err(CodecError::malformed(
            "EF_IMSI",
            format!("{} digits, not decimal", digits.len()),
        ));
    }
    Ok(digits)
}

/// Encode an IMSI into EF_IMSI layout (9 bytes).
pub fn imsi_to_ef(imsi: &str) -> Result<Vec<u8>, CodecError> {
    let digits = decimal_digits("IMSI", imsi)?;
    if digits.len() > 15 {
        return Err(CodecError::Overflow {
            what: "IMSI",
            reason: format!("{} digits", digits.len()),
        });
    }
    let parity = if digits.len() % 2 == 1 { 0x09 } else { 0x01 };
    let mut nibbles = Vec::with_capacity(16);
    nibbles.push(parity);
    nibbles.extend_from_slice(&digits);
    let bytes = pack_nibbles(&nibbles);
    let mut out = vec![0xFF; MAX_IMSI_BYTES + 1];
    out[0] = u8::try_from(bytes.len()).unwrap_or(u8::MAX);
    out[1..=bytes.len()].copy_from_slice(&bytes);
    Ok(out)
}

/// Decode a 3-byte PLMN (TS 24.008 figure 10.5.13). Filler `F` digits are
/// dropped, so a two-digit MNC yields five characters. Any other non-decimal
/// nibble (`D` wildcards in EF_OPL) is kept.
pub fn plmn_to_string(data: &[u8]) -> Option<String> {
    let &[b0, b1, b2] = data.get(..3)? else {
        return None;
    };
    let digits = [b0 & 0x0F, b0 >> 4, b1 & 0x0F, b2 & 0x0F, b2 >> 4, b1 >> 4];
    Some(
        digits
            .iter()
            .filter(|&&n| n != 0x0F)
            .map(|&n| hex_digit(n))
            .collect(),
    )
}

/// Encode a 5- or 6-digit PLMN into its 3-byte form.
pub fn string_to_plmn(plmn: &str) -> Result<[u8; 3], CodecError> {
    let digits = decimal_digits("PLMN", plmn)?;
    let [m1, m2, m3, n1, n2, n3] = match digits.as_slice() {
        [a, b, c, d, e] => [*a, *b, *c, *d, *e, 0x0F],
        [a, b, c, d, e, f] => [*a, *b, *c, *d, *e, *f],
        _ => {
            return Err(CodecError::malformed(
                "PLMN",
                format!("expected 5 or 6 digits, got {}", digits.len()),
            ));
        }
    };
    Ok([(m2 << 4) | m1, (n3 << 4) | m3, (n2 << 4) | n1])
}

/// Render a called-party BCD number. `data[0]` is the TON/NPI byte,
/// followed by the digit octets.
pub fn called_party_to_string(data: &[u8]) -> String {
    let Some((&toa, digits)) = data.split_first() else {
        return String::new();
    };
    let mut out = String::new();
    if toa & 0xF0 == 0x90 {
        out.push('+');
    }
    out.push_str(&called_party_fragment(digits));
    out
}

/// Digits of a called-party number without a TON byte (EXT records).
pub fn called_party_fragment(data: &[u8]) -> String {
    nibbles(data)
        .take_while(|&n| n != 0x0F)
        .filter_map(|n| match n {
            0..=9 => Some(hex_digit(n)),
            0x0A => Some('*'),
            0x0B => Some('#'),
            0x0C => Some(','),
            0x0D => Some('N'),
            _ => None,
        })
        .collect()
}

/// Encode a dialable number: TON/NPI byte followed by packed digits.
pub fn number_to_called_party(number: &str) -> Result<Vec<u8>, CodecError> {
    let (toa, body) = match number.strip_prefix('+') {
        Some(rest) => (TOA_INTERNATIONAL, rest),
        None => (TOA_UNKNOWN, number),
    };
    let mut nibbles = Vec::with_capacity(body.len());
    for ch in body.chars() {
        nibbles.push(match ch {
            '0'..='9' => u8::try_from(ch.to_digit(10).unwrap_or(0)).unwrap_or(0),
            '*' => 0x0A,
            '#' => 0x0B,
            ',' | 'P' | 'p' => 0x0C,
            'N' | 'n' | ';' | 'W' | 'w' => 0x0D,
            // Visual separators carry no digit.
            ' ' | '-' | '(' | ')' | '.' => continue,
            other => {
                return Err(CodecError::malformed(
                    "dialling number",
                    format!("character {other:?} is not dialable"),
                ));
            }
        });
    }
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 2);
    out.push(toa);
    out.extend(pack_nibbles(&nibbles));
    Ok(out)
}

fn decimal_digits(what: &'static str, text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .map(|c| {
            c.to_digit(10)
                .and_then(|d| u8::try_from(d).ok())
                .ok_or_else(|| CodecError::malformed(what, format!("non-digit {c:?}")))
        })
        .collect()
}

/// Pack nibbles low-first, padding an odd count with `F`.
fn pack_nibbles(nibbles: &[u8]) -> Vec<u8> {
    nibbles
        .chunks(2)
        .map(|pair| match pair {
            [lo, hi] => (hi << 4) | lo,
            [lo] => 0xF0 | lo,
            _ => 0xFF,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn iccid_decimal_and_full_forms() {
        let raw = hex::decode("98101430121181157002").unwrap();
        assert_eq!(bcd_to_string(&raw), "89014103211118510720");
        let padded = hex::decode("981014301211811570F2").unwrap();
        assert_eq!(bcd_to_string(&padded), "8901410321111851072");
        assert_eq!(bcd_to_hex_string(&padded), "8901410321111851072F");
    }

    #[test]
    fn imsi_skips_parity_nibble() {
        let ef = hex::decode("083901621032547698").unwrap();
        assert_eq!(imsi_from_ef(&ef).unwrap(), "310260123456789");
        assert_eq!(imsi_to_ef("310260123456789").unwrap(), ef);
    }

    #[test]
    fn imsi_rejects_bad_length() {
        assert!(imsi_from_ef(&[0x0C, 0x39, 0x01]).is_err());
        assert!(imsi_from_ef(&[]).is_err());
    }

    #[test]
    fn plmn_two_and_three_digit_mnc() {
        assert_eq!(plmn_to_string(&[0x13, 0x00, 0x62]).unwrap(), "310260");
        assert_eq!(plmn_to_string(&[0x13, 0xF0, 0x62]).unwrap(), "31026");
        assert_eq!(string_to_plmn("31026").unwrap(), [0x13, 0xF0, 0x62]);
        assert_eq!(string_to_plmn("310260").unwrap(), [0x13, 0x00, 0x62]);
        assert!(string_to_plmn("3102").is_err());
    }

    #[test]
    fn called_party_numbers() {
        assert_eq!(called_party_to_string(&[0x91, 0x21, 0x43, 0xF5]), "+12345");
        assert_eq!(called_party_to_string(&[0x81, 0xBA, 0x21]), "*#12");
        assert_eq!(number_to_called_party("+12345").unwrap(), vec![0x91, 0x21, 0x43, 0xF5]);
        assert!(number_to_called_party("12a").is_err());
    }

    #[test]
    fn cdma_bcd_reads_invalid_as_zero() {
        assert_eq!(cdma_bcd_to_string(&[0x21, 0xA3, 0x54], 5), "12304");
    }
}
