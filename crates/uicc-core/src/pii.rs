//! Masking for subscriber identifiers in logs.

use std::fmt;

const VISIBLE_PREFIX: usize = 6;

/// Display wrapper that keeps a short prefix and hides the rest, so an
/// ICCID or IMSI in a log line still identifies the operator but not the
/// subscriber.
#[derive(Clone, Copy)]
pub struct Masked<'a>(&'a str);

pub fn pii(value: &str) -> Masked<'_> {
    Masked(value)
}

impl fmt::Display for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(VISIBLE_PREFIX).collect();
        let hidden = self.0.chars().count().saturating_sub(VISIBLE_PREFIX);
        write!(f, "{visible}")?;
        for _ in 0..hidden {
            f.write_str("*")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_all_but_prefix() {
        assert_eq!(pii("310260123456789").to_string(), "310260*********");
        assert_eq!(pii("1234").to_string(), "1234");
        assert_eq!(format!("{:?}", pii("")), "\"\"");
    }
}
