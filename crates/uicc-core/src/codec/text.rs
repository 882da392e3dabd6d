//! Text encodings found on SIM cards (TS 23.038, TS 51.011 annex B).

use super::CodecError;

const ESCAPE: u8 = 0x1B;

/// GSM 7-bit default alphabet. Index 0x1B is the escape to the extension
/// table and never rendered directly.
const GSM_DEFAULT: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å', //
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', ' ', 'Æ', 'æ', 'ß', 'É', //
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§', //
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à', //
];

const GSM_EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0C}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

fn default_char(code: u8) -> char {
    GSM_DEFAULT[usize::from(code & 0x7F)]
}

fn extension_char(code: u8) -> char {
    GSM_EXTENSION
        .iter()
        .find(|(c, _)| *c == code)
        .map_or_else(|| default_char(code), |(_, ch)| *ch)
}

fn char_to_gsm(ch: char) -> Option<(Option<u8>, u8)> {
    if let Some(code) = GSM_DEFAULT
        .iter()
        .enumerate()
        .find(|&(i, c)| *c == ch && i != usize::from(ESCAPE))
        .and_then(|(i, _)| u8::try_from(i).ok())
    {
        return Some((None, code));
    }
    GSM_EXTENSION
        .iter()
        .find(|(_, c)| *c == ch)
        .map(|(code, _)| (Some(ESCAPE), *code))
}

/// Decode a sequence of septet values, resolving escape pairs.
fn septets_to_string(septets: impl Iterator<Item = u8>) -> String {
    let mut out = String::new();
    let mut escaped = false;
    for code in septets {
        if escaped {
            escaped = false;
            if code == ESCAPE {
                out.push(' ');
            } else {
                out.push(extension_char(code));
            }
        } else if code == ESCAPE {
            escaped = true;
        } else {
            out.push(default_char(code));
        }
    }
    out
}

/// GSM default alphabet, one septet per octet, terminated by `0xFF`.
pub fn gsm8_to_string(data: &[u8]) -> String {
    septets_to_string(data.iter().copied().take_while(|&b| b != 0xFF).map(|b| b & 0x7F))
}

/// Encode into unpacked GSM 8-bit form; `None` if any character has no
/// GSM representation.
pub fn string_to_gsm8(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let (escape, code) = char_to_gsm(ch)?;
        out.extend(escape);
        out.push(code);
    }
    Some(out)
}

/// Unpack `septets` GSM 7-bit characters, skipping `padding_bits` leading
/// fill bits.
pub fn unpack_gsm7(data: &[u8], septets: usize, padding_bits: usize) -> String {
    let codes = (0..septets).map_while(|i| {
        let bit = padding_bits + i * 7;
        let byte = bit / 8;
        let shift = bit % 8;
        let low = *data.get(byte)? >> shift;
        let high = if shift > 1 {
            data.get(byte + 1).map_or(0, |b| b << (8 - shift))
        } else {
            0
        };
        Some((low | high) & 0x7F)
    });
    septets_to_string(codes)
}

/// UCS2 big-endian, stopping at the first `FFFF` fill character.
pub fn ucs2_to_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take_while(|&u| u != 0xFFFF)
        .collect();
    String::from_utf16_lossy(&units)
}

/// UTF-16 honouring a byte-order mark; big-endian when there is none.
pub fn utf16_to_string(data: &[u8]) -> String {
    match data {
        [0xFF, 0xFE, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|p| u16::from_le_bytes([p[0], p[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        [0xFE, 0xFF, rest @ ..] => ucs2_to_string(rest),
        _ => ucs2_to_string(data),
    }
}

pub fn latin1_to_string(data: &[u8]) -> String {
    data.iter().copied().map(char::from).collect()
}

/// 7-bit ASCII if every byte is printable, otherwise GSM 7-bit packed.
pub fn ascii_or_gsm7(data: &[u8]) -> String {
    if data.iter().all(|b| (0x20..=0x7E).contains(b)) {
        latin1_to_string(data)
    } else {
        unpack_gsm7(data, data.len() * 8 / 7, 0)
    }
}

/// Decode an alpha-identifier field (ADN, SPN, MSISDN, mailbox).
///
/// Handles the three UCS2 forms of TS 102.221 annex A (`0x80` plain,
/// `0x81`/`0x82` with a base pointer) and falls back to GSM 8-bit.
pub fn adn_alpha_to_string(data: &[u8]) -> String {
    match data {
        [] => String::new(),
        [0x80, rest @ ..] => ucs2_to_string(rest),
        [0x81, len, base, rest @ ..] => {
            decode_based_ucs2(usize::from(*len), u32::from(*base) << 7, rest)
        }
        [0x82, len, hi, lo, rest @ ..] => decode_based_ucs2(
            usize::from(*len),
            u32::from(u16::from_be_bytes([*hi, *lo])),
            rest,
        ),
        _ => gsm8_to_string(data),
    }
}

fn decode_based_ucs2(len: usize, base: u32, data: &[u8]) -> String {
    let mut out = String::new();
    let mut escaped = false;
    for &b in data.iter().take(len) {
        if b & 0x80 != 0 {
            escaped = false;
            if let Some(ch) = char::from_u32(base + u32::from(b & 0x7F)) {
                out.push(ch);
            }
        } else if escaped {
            escaped = false;
            out.push(extension_char(b));
        } else if b == ESCAPE {
            escaped = true;
        } else {
            out.push(default_char(b));
        }
    }
    out
}

/// Encode an alpha identifier into a field of exactly `max_len` bytes.
pub fn string_to_adn_alpha(text: &str, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut encoded = match string_to_gsm8(text) {
        Some(gsm) => gsm,
        None => {
            let mut ucs2 = vec![0x80];
            for unit in text.encode_utf16() {
                ucs2.extend_from_slice(&unit.to_be_bytes());
            }
            ucs2
        }
    };
    if encoded.len() > max_len {
        return Err(CodecError::Overflow {
            what: "alpha identifier",
            reason: format!("{} bytes exceed field of {max_len}", encoded.len()),
        });
    }
    encoded.resize(max_len, 0xFF);
    Ok(encoded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn gsm8_stops_at_fill() {
        assert_eq!(gsm8_to_string(&[0x41, 0x43, 0x4D, 0x45, 0xFF, 0x41]), "ACME");
    }

    #[test]
    fn gsm8_escape_sequences() {
        assert_eq!(gsm8_to_string(&[0x1B, 0x65, 0x35]), "€5");
        assert_eq!(string_to_gsm8("{x}").unwrap(), vec![0x1B, 0x28, 0x78, 0x1B, 0x29]);
        assert!(string_to_gsm8("日本").is_none());
    }

    #[test]
    fn unpacks_packed_septets() {
        let packed = hex::decode("E8329BFD06").unwrap();
        assert_eq!(unpack_gsm7(&packed, 5, 0), "hello");
    }

    #[test]
    fn adn_alpha_forms() {
        assert_eq!(adn_alpha_to_string(&[0x80, 0x00, 0x41, 0x04, 0x10, 0xFF, 0xFF]), "AА");
        // 0x81: two chars, base 0x0400, first from base, second GSM 'a'.
        assert_eq!(adn_alpha_to_string(&[0x81, 0x02, 0x08, 0x90, 0x61, 0xFF]), "Аa");
        assert_eq!(adn_alpha_to_string(&[0x82, 0x01, 0x04, 0x00, 0x91]), "ё");
    }

    #[test]
    fn adn_alpha_encoding_pads_and_falls_back() {
        assert_eq!(
            string_to_adn_alpha("Bob", 5).unwrap(),
            vec![0x42, 0x6F, 0x62, 0xFF, 0xFF]
        );
        assert_eq!(
            string_to_adn_alpha("Ж", 4).unwrap(),
            vec![0x80, 0x04, 0x16, 0xFF]
        );
        assert!(string_to_adn_alpha("Robert", 3).is_err());
    }

    #[test]
    fn ascii_falls_back_to_gsm7() {
        assert_eq!(ascii_or_gsm7(b"Carrier"), "Carrier");
        assert_eq!(ascii_or_gsm7(&hex::decode("E8329BFD06").unwrap()), "hello");
    }

    #[test]
    fn utf16_bom() {
        assert_eq!(utf16_to_string(&[0xFF, 0xFE, 0x41, 0x00]), "A");
        assert_eq!(utf16_to_string(&[0x00, 0x42]), "B");
    }
}
