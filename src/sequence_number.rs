//! Dedicated logic for sequence numbers.
//!
//! Every node stamps the control messages it originates with a monotonically
//! increasing session sequence number. Stored routes remember the freshest
//! sequence number known for their destination, and incoming control messages
//! are only allowed to replace stored state when they carry a strictly
//! fresher one.

use core::fmt;

/// A sequence number tracking the freshness of routing state for a node.
///
/// Comparison is a plain strict ordering on the raw value: wrap-around of the
/// counter is not handled, so a route learned just before the counter wraps
/// will shadow fresher post-wrap state until it expires from the table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeqNo(u32);

impl SeqNo {
    /// Create a new `SeqNo` with the default value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if this `SeqNo` is strictly fresher than the given one.
    pub fn is_fresher_than(&self, other: SeqNo) -> bool {
        self.0 > other.0
    }

    /// The value truncated to the 24 bits available in the compact wire
    /// encodings.
    pub fn truncated(&self) -> u32 {
        self.0 & 0x00ff_ffff
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl From<u32> for SeqNo {
    fn from(value: u32) -> Self {
        SeqNo(value)
    }
}

impl From<SeqNo> for u32 {
    fn from(value: SeqNo) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::SeqNo;

    #[test]
    fn freshness_is_strict() {
        assert!(SeqNo::from(2).is_fresher_than(SeqNo::from(1)));
        assert!(!SeqNo::from(1).is_fresher_than(SeqNo::from(1)));
        assert!(!SeqNo::from(0).is_fresher_than(SeqNo::from(1)));
    }

    #[test]
    fn truncation_keeps_low_24_bits() {
        assert_eq!(SeqNo::from(0x0123_4567).truncated(), 0x0023_4567);
        assert_eq!(SeqNo::from(0x00ff_ffff).truncated(), 0x00ff_ffff);
    }
}
