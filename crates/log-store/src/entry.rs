use std::collections::BTreeMap;
use std::str::FromStr;

use crate::LogStoreError;

/// Flat string-valued field map carried by every entry.
pub type Fields = BTreeMap<String, String>;

/// Identifier of an entry within a stream.
///
/// Formatted as `<millis>-<sequence>` like Redis stream IDs. IDs strictly
/// increase within a stream: entries appended in the same millisecond (or
/// after a clock step backwards) bump the sequence instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    millis: u64,
    seq: u64,
}

impl EntryId {
    /// The smallest possible ID, `0-0`. Reading pending history "after zero"
    /// starts from the beginning.
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    /// Creates an ID from its two parts.
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Returns the millisecond part.
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Returns the sequence part.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the next ID to assign after `self` given the current wall clock.
    pub fn successor(&self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self::new(now_millis, 0)
        } else {
            Self::new(self.millis, self.seq + 1)
        }
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = LogStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LogStoreError::InvalidEntryId(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// An immutable entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub fields: Fields,
}

impl Entry {
    /// Creates an entry.
    pub fn new(id: EntryId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Returns the value of a field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let id: EntryId = "1672531200000-3".parse().unwrap();
        assert_eq!(id, EntryId::new(1_672_531_200_000, 3));
        assert_eq!(id.to_string(), "1672531200000-3");
    }

    #[test]
    fn parse_without_sequence() {
        let id: EntryId = "15".parse().unwrap();
        assert_eq!(id, EntryId::new(15, 0));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "abc-1".parse::<EntryId>(),
            Err(LogStoreError::InvalidEntryId(_))
        ));
        assert!("1-x".parse::<EntryId>().is_err());
    }

    #[test]
    fn successor_is_strictly_greater() {
        let id = EntryId::new(100, 4);
        assert_eq!(id.successor(200), EntryId::new(200, 0));
        assert_eq!(id.successor(100), EntryId::new(100, 5));
        // clock went backwards
        assert_eq!(id.successor(50), EntryId::new(100, 5));
        assert!(id.successor(50) > id);
    }

    #[test]
    fn ordering_compares_millis_first() {
        assert!(EntryId::new(1, 9) < EntryId::new(2, 0));
        assert!(EntryId::ZERO < EntryId::new(0, 1));
    }
}
