//! Byte ranges and per-part records of a multipart upload.

use serde::{Deserialize, Serialize};

/// An inclusive byte range `[start, end]` within the archive.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering `len` bytes starting at `start`. `len` must be non-zero.
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start + len - 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Content-Range form expected by the service, e.g. `bytes 0-8388607/*`.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.start, self.end)
    }
}

/// Record of one acknowledged part.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    /// 1-based part number in file order.
    pub part_number: u32,

    pub range: ByteRange,

    /// Tree hash of this part's bytes.
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_is_inclusive() {
        let range = ByteRange::new(8 * 1024 * 1024, 4 * 1024 * 1024);
        assert_eq!(range.content_range(), "bytes 8388608-12582911/*");
        assert_eq!(range.len(), 4 * 1024 * 1024);
    }

    #[test]
    fn single_byte_range() {
        let range = ByteRange::new(0, 1);
        assert_eq!(range.end, 0);
        assert_eq!(range.content_range(), "bytes 0-0/*");
    }
}
