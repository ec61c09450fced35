//! Represents multipart upload sessions ("segments") and their parts.

use serde::{Deserialize, Serialize};

/// One uploaded chunk of a segment.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Part {
    /// Byte position within the final object.
    pub offset: u64,
    pub size: u64,
    /// Sequence number assigned at insertion (1-based).
    pub number: u32,
}

impl Part {
    /// Exclusive end of the byte range.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Whether `[offset, offset + size)` intersects this part's range.
    pub fn overlaps(&self, offset: u64, size: u64) -> bool {
        offset < self.end() && self.offset < offset.saturating_add(size)
    }
}

/// Part descriptor handed to the provider's commit call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub number: u32,
    pub offset: u64,
    pub size: u64,
}

impl From<&Part> for CompletedPart {
    fn from(part: &Part) -> Self {
        Self {
            number: part.number,
            offset: part.offset,
            size: part.size,
        }
    }
}

/// Snapshot of one open segment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Upload identifier issued by the provider.
    pub id: String,
    /// Caller-relative path of the target object.
    pub path: String,
    /// Declared total size of the final object.
    pub total_size: u64,
    /// Recorded parts, ordered by offset.
    pub parts: Vec<Part>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_half_open() {
        let part = Part {
            offset: 100,
            size: 50,
            number: 1,
        };
        assert!(!part.overlaps(0, 100));
        assert!(!part.overlaps(150, 10));
        assert!(part.overlaps(149, 1));
        assert!(part.overlaps(50, 51));
        assert!(part.overlaps(120, 5));
        assert!(part.overlaps(0, 1000));
    }

    #[test]
    fn ranges_near_the_top_do_not_wrap() {
        let part = Part {
            offset: u64::MAX - 1,
            size: 2,
            number: 1,
        };
        assert_eq!(part.end(), u64::MAX);
        assert!(part.overlaps(u64::MAX - 1, u64::MAX));
        assert!(!part.overlaps(0, 2));
    }
}
