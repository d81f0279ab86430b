use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePositionError(pub String);

impl std::fmt::Display for ParsePositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid binlog position: {}", self.0)
    }
}
impl std::error::Error for ParsePositionError {}

/// A point in the source's binary log: file name plus byte offset.
///
/// Positions are totally ordered by the numeric suffix of the file name
/// (`mysql-bin.000042` has sequence 42) and then by offset, so positions in
/// different files compare the way the server rotates them. Names without a
/// numeric suffix come first, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub file: String,
    pub offset: u64,
}

impl LogPosition {
    pub fn new(file: impl Into<String>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }

    /// Parse `file:offset`, e.g. `mysql-bin.000003:154`.
    pub fn parse(s: &str) -> Result<LogPosition, ParsePositionError> {
        let (file, offset) = s
            .rsplit_once(':')
            .ok_or_else(|| ParsePositionError(s.into()))?;
        if file.is_empty() {
            return Err(ParsePositionError(s.into()));
        }
        let offset = offset
            .parse::<u64>()
            .map_err(|_| ParsePositionError(s.into()))?;
        Ok(LogPosition::new(file, offset))
    }

    /// Numeric suffix of the file name, if it has one.
    pub fn file_sequence(&self) -> Option<u64> {
        let digits = self
            .file
            .rsplit(|c: char| !c.is_ascii_digit())
            .next()
            .filter(|d| !d.is_empty())?;
        digits.parse().ok()
    }
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        // Names without a numeric suffix sort before all numbered ones.
        self.file_sequence()
            .cmp(&other.file_sequence())
            .then_with(|| self.file.cmp(&other.file))
            .then_with(|| self.offset.cmp(&other.offset))
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::LogPosition;

    #[test]
    fn position_parse_roundtrip() {
        let s = "mysql-bin.000003:154";
        let p = LogPosition::parse(s).unwrap();
        assert_eq!(p.file, "mysql-bin.000003");
        assert_eq!(p.offset, 154);
        assert_eq!(p.to_string(), s);
    }

    #[test]
    fn position_parse_rejects_garbage() {
        assert!(LogPosition::parse("mysql-bin.000003").is_err());
        assert!(LogPosition::parse(":12").is_err());
        assert!(LogPosition::parse("f:-1").is_err());
    }

    #[test]
    fn file_sequence_beats_offset() {
        let a = LogPosition::new("mysql-bin.000009", 90_000);
        let b = LogPosition::new("mysql-bin.000010", 4);
        assert!(a < b);
        // Lexical order alone would get this wrong.
        let c = LogPosition::new("bin.9", 10);
        let d = LogPosition::new("bin.10", 4);
        assert!(c < d);
    }

    #[test]
    fn minimum_across_files() {
        let positions = [
            LogPosition::new("file1", 500),
            LogPosition::new("file1", 300),
            LogPosition::new("file2", 700),
        ];
        let min = positions.iter().min().unwrap();
        assert_eq!(min, &LogPosition::new("file1", 300));
    }

    #[test]
    fn mixed_file_names_order_consistently() {
        let a = LogPosition::new("a10", 4);
        let b = LogPosition::new("b", 4);
        let c = LogPosition::new("c2", 4);
        assert!(b < c && c < a && b < a);

        let mut forward = vec![a.clone(), b.clone(), c.clone()];
        let mut backward = vec![c, b.clone(), a];
        forward.sort();
        backward.sort();
        assert_eq!(forward, backward);
        assert_eq!(forward.iter().min(), Some(&b));
        assert_eq!(backward.iter().min(), Some(&b));
    }
}
