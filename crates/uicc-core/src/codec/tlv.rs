//! SIM BER-TLV walker (TS 102.221 annex D): one-byte tags, lengths in one
//! byte or `0x81` + one byte.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Iterates objects until the data ends or an invalid object is met
/// (tag `00`/`FF`, bad length form, or a value running past the end).
#[derive(Debug, Clone)]
pub struct SimTlv<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SimTlv<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// First object carrying `tag`.
    pub fn find(data: &'a [u8], tag: u8) -> Option<&'a [u8]> {
        Self::new(data).find(|t| t.tag == tag).map(|t| t.value)
    }
}

impl<'a> Iterator for SimTlv<'a> {
    type Item = Tlv<'a>;

    fn next(&mut self) -> Option<Tlv<'a>> {
        let rest = self.data.get(self.pos..)?;
        let (&tag, rest) = rest.split_first()?;
        if tag == 0x00 || tag == 0xFF {
            self.pos = self.data.len();
            return None;
        }
        let (len, header) = match rest {
            [0x81, len, ..] if *len >= 0x80 => (usize::from(*len), 3),
            [len, ..] if *len < 0x80 => (usize::from(*len), 2),
            _ => {
                self.pos = self.data.len();
                return None;
            }
        };
        let start = self.pos + header;
        let Some(value) = self.data.get(start..start + len) else {
            self.pos = self.data.len();
            return None;
        };
        self.pos = start + len;
        Some(Tlv { tag, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_objects() {
        let data = [0x43, 0x02, 0xAA, 0xBB, 0x45, 0x01, 0xCC, 0xFF, 0xFF];
        let tags: Vec<_> = SimTlv::new(&data).map(|t| (t.tag, t.value.len())).collect();
        assert_eq!(tags, vec![(0x43, 2), (0x45, 1)]);
    }

    #[test]
    fn long_length_form() {
        let mut data = vec![0x80, 0x81, 0x80];
        data.extend(std::iter::repeat_n(0x11, 0x80));
        assert_eq!(SimTlv::find(&data, 0x80).map(<[u8]>::len), Some(0x80));
    }

    #[test]
    fn truncated_value_stops() {
        assert_eq!(SimTlv::new(&[0x43, 0x05, 0x01]).count(), 0);
    }
}
