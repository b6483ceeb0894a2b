//! Human-readable byte size formatting for stats output.

use serde::{Serialize, Serializer};
use std::fmt;

/// Byte count that formats and serializes as a human-readable size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

        let mut whole = self.0;
        let mut remainder = 0;
        let mut unit = 0;
        while whole >= 1024 && unit + 1 < UNITS.len() {
            remainder = whole % 1024;
            whole /= 1024;
            unit += 1;
        }

        match remainder * 10 / 1024 {
            0 => format!("{}{}", whole, UNITS[unit]),
            tenths => format!("{}.{}{}", whole, tenths, UNITS[unit]),
        }
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_human_readable())
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_units() {
        assert_eq!(ByteSize(512).to_human_readable(), "512B");
        assert_eq!(ByteSize(1024).to_human_readable(), "1KB");
        assert_eq!(ByteSize(5 * 1024 * 1024).to_human_readable(), "5MB");
        assert_eq!(ByteSize(50 * 1024 * 1024 * 1024).to_human_readable(), "50GB");
    }

    #[test]
    fn formats_fractional_units() {
        assert_eq!(ByteSize(1024 + 512).to_human_readable(), "1.5KB");
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&ByteSize(2048)).unwrap();
        assert_eq!(json, "\"2KB\"");
    }

    #[test]
    fn display_matches_human_readable() {
        assert_eq!(format!("{}", ByteSize(1024)), "1KB");
    }
}
