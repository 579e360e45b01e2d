//! The server's reply to a metadata line.

use std::fmt;

/// Number of bytes the resume offset occupies on the wire.
pub const OFFSET_LEN: usize = 8;

/// Byte position from which the client should continue sending.
///
/// The value is always the length of the stored file at the moment the server
/// computed it. It travels as a fixed-width little-endian `u64` regardless of
/// host byte order.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResumeOffset(u64);

impl ResumeOffset {
    /// Offset reported for a file the server has never seen.
    pub const ZERO: Self = Self(0);

    /// Wraps a stored length.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the raw byte position.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Encodes the offset for the wire.
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; OFFSET_LEN] {
        self.0.to_le_bytes()
    }

    /// Decodes an offset received from the server.
    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; OFFSET_LEN]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Returns how many bytes the client still owes, or `None` when the
    /// stored file already covers `declared_size` and nothing should be sent.
    #[must_use]
    pub const fn remaining(self, declared_size: u64) -> Option<u64> {
        if self.0 < declared_size {
            Some(declared_size - self.0)
        } else {
            None
        }
    }
}

impl From<u64> for ResumeOffset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResumeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encoding_is_little_endian() {
        let offset = ResumeOffset::new(0x0102_0304_0506_0708);
        assert_eq!(
            offset.to_le_bytes(),
            [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn zero_encodes_as_eight_zero_bytes() {
        assert_eq!(ResumeOffset::ZERO.to_le_bytes(), [0u8; OFFSET_LEN]);
    }

    #[test]
    fn remaining_when_partial() {
        assert_eq!(ResumeOffset::new(0).remaining(10), Some(10));
        assert_eq!(ResumeOffset::new(4).remaining(10), Some(6));
    }

    #[test]
    fn nothing_remaining_when_complete_or_larger() {
        assert_eq!(ResumeOffset::new(10).remaining(10), None);
        assert_eq!(ResumeOffset::new(11).remaining(10), None);
        assert_eq!(ResumeOffset::new(0).remaining(0), None);
    }

    proptest! {
        #[test]
        fn remaining_plus_offset_is_declared(offset in any::<u64>(), declared in any::<u64>()) {
            let offset = ResumeOffset::new(offset);
            match offset.remaining(declared) {
                Some(rest) => prop_assert_eq!(offset.get() + rest, declared),
                None => prop_assert!(offset.get() >= declared),
            }
        }
    }
}
