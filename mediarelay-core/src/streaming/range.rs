//! HTTP byte ranges and their decomposition into chunk fetches

use thiserror::Error;

/// Errors produced when interpreting a Range header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// Header could not be parsed.
    #[error("invalid Range header: {header}")]
    Malformed { header: String },

    /// Range lies outside the file.
    #[error("requested range not satisfiable for file of {file_size} bytes")]
    Unsatisfiable { file_size: u64 },
}

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Creates a range after checking it against the file size.
    ///
    /// # Errors
    ///
    /// - `RangeError::Unsatisfiable` - `start > end` or `end` beyond the last byte
    pub fn new(start: u64, end: u64, file_size: u64) -> Result<Self, RangeError> {
        if start > end || end >= file_size {
            return Err(RangeError::Unsatisfiable { file_size });
        }
        Ok(Self { start, end })
    }

    /// The whole file, or `None` for an empty file.
    pub fn full(file_size: u64) -> Option<Self> {
        file_size.checked_sub(1).map(|end| Self { start: 0, end })
    }

    /// Parses a `bytes=` Range header value.
    ///
    /// Supports `bytes=a-b`, open-ended `bytes=a-` and suffix `bytes=-n`.
    /// Multi-range requests are rejected as malformed.
    ///
    /// # Errors
    ///
    /// - `RangeError::Malformed` - Header is not a single `bytes=` range
    /// - `RangeError::Unsatisfiable` - Range lies outside the file
    pub fn parse(header: &str, file_size: u64) -> Result<Self, RangeError> {
        let malformed = || RangeError::Malformed {
            header: header.to_string(),
        };

        let ranges = header.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
        let (from, until) = ranges.split_once('-').ok_or_else(malformed)?;
        let (from, until) = (from.trim(), until.trim());

        if from.is_empty() {
            let suffix: u64 = until.parse().map_err(|_| malformed())?;
            if suffix == 0 || file_size == 0 {
                return Err(RangeError::Unsatisfiable { file_size });
            }
            return Self::new(file_size.saturating_sub(suffix), file_size - 1, file_size);
        }

        let start: u64 = from.parse().map_err(|_| malformed())?;
        let end = if until.is_empty() {
            file_size
                .checked_sub(1)
                .ok_or(RangeError::Unsatisfiable { file_size })?
        } else {
            until.parse().map_err(|_| malformed())?
        };

        Self::new(start, end, file_size)
    }

    /// Number of bytes covered; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Sequence of chunk-aligned fetches covering a byte range.
///
/// Upstream fetches start at chunk-aligned offsets; the first chunk is cut
/// from `first_part_cut` and the last is cut at `last_part_cut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    pub range: ByteRange,
    pub chunk_size: u32,
    /// Aligned offset of the first fetch.
    pub offset: u64,
    pub first_part_cut: usize,
    /// Exclusive end of the bytes kept from the last chunk.
    pub last_part_cut: usize,
    pub part_count: u64,
}

impl RangePlan {
    /// Plans the fetches for `range` with the given chunk size (must be non-zero).
    pub fn new(range: ByteRange, chunk_size: u32) -> Self {
        let chunk = u64::from(chunk_size.max(1));
        let offset = range.start - range.start % chunk;

        Self {
            range,
            chunk_size: chunk_size.max(1),
            offset,
            first_part_cut: (range.start - offset) as usize,
            last_part_cut: (range.end % chunk + 1) as usize,
            part_count: range.end / chunk - offset / chunk + 1,
        }
    }

    /// Number of bytes the plan delivers.
    pub fn content_length(&self) -> u64 {
        self.range.len()
    }

    /// Cuts the payload of part `part` (1-based) down to the requested bytes.
    ///
    /// Cut points beyond a short payload are clamped to its length.
    pub fn trim(&self, part: u64, payload: bytes::Bytes) -> bytes::Bytes {
        let len = payload.len();
        let (start, end) = if self.part_count == 1 {
            (self.first_part_cut, self.last_part_cut)
        } else if part == 1 {
            (self.first_part_cut, len)
        } else if part == self.part_count {
            (0, self.last_part_cut)
        } else {
            (0, len)
        };

        let end = end.min(len);
        payload.slice(start.min(end)..end)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    const MIB: u32 = 1024 * 1024;

    #[test]
    fn test_parse_closed_range() {
        assert_eq!(
            ByteRange::parse("bytes=100-199", 1000),
            Ok(ByteRange {
                start: 100,
                end: 199
            })
        );
    }

    #[test]
    fn test_parse_open_and_suffix_ranges() {
        assert_eq!(
            ByteRange::parse("bytes=500-", 1000),
            Ok(ByteRange {
                start: 500,
                end: 999
            })
        );
        assert_eq!(
            ByteRange::parse("bytes=-100", 1000),
            Ok(ByteRange {
                start: 900,
                end: 999
            })
        );
        assert_eq!(
            ByteRange::parse("bytes=-5000", 1000),
            Ok(ByteRange { start: 0, end: 999 })
        );
    }

    #[test]
    fn test_parse_rejects_malformed_headers() {
        for header in ["items=0-1", "bytes=abc-", "bytes=1-x", "bytes=0-1,5-6", "bytes"] {
            assert!(
                matches!(
                    ByteRange::parse(header, 1000),
                    Err(RangeError::Malformed { .. })
                ),
                "{header} should be malformed"
            );
        }
    }

    #[test]
    fn test_parse_rejects_unsatisfiable_ranges() {
        for header in ["bytes=1000-", "bytes=10-1000", "bytes=20-10", "bytes=-0"] {
            assert_eq!(
                ByteRange::parse(header, 1000),
                Err(RangeError::Unsatisfiable { file_size: 1000 }),
                "{header} should be unsatisfiable"
            );
        }
        assert_eq!(
            ByteRange::parse("bytes=0-", 0),
            Err(RangeError::Unsatisfiable { file_size: 0 })
        );
    }

    #[test]
    fn test_full_range() {
        assert_eq!(ByteRange::full(10), Some(ByteRange { start: 0, end: 9 }));
        assert_eq!(ByteRange::full(0), None);
    }

    #[test]
    fn test_plan_two_parts_across_chunk_boundary() {
        let range = ByteRange::new(500_000, 2_000_000, 2_621_440).unwrap();
        let plan = RangePlan::new(range, MIB);

        assert_eq!(plan.offset, 0);
        assert_eq!(plan.first_part_cut, 500_000);
        assert_eq!(plan.last_part_cut, 2_000_000 - 1_048_576 + 1);
        assert_eq!(plan.part_count, 2);
        assert_eq!(plan.content_length(), 1_500_001);
    }

    #[test]
    fn test_plan_single_part() {
        let range = ByteRange::new(1_048_600, 1_048_700, 3 * 1_048_576).unwrap();
        let plan = RangePlan::new(range, MIB);

        assert_eq!(plan.offset, 1_048_576);
        assert_eq!(plan.first_part_cut, 24);
        assert_eq!(plan.last_part_cut, 125);
        assert_eq!(plan.part_count, 1);
    }

    #[test]
    fn test_plan_range_ending_on_chunk_boundary() {
        // Last byte is the first byte of the second chunk.
        let range = ByteRange::new(10, 1_048_576, 3 * 1_048_576).unwrap();
        let plan = RangePlan::new(range, MIB);

        assert_eq!(plan.part_count, 2);
        assert_eq!(plan.last_part_cut, 1);

        // Single first byte of the file.
        let plan = RangePlan::new(ByteRange::new(0, 0, 5).unwrap(), MIB);
        assert_eq!(plan.part_count, 1);
        assert_eq!((plan.first_part_cut, plan.last_part_cut), (0, 1));
    }

    #[test]
    fn test_trim_by_part_position() {
        let range = ByteRange::new(2, 9, 12).unwrap();
        let plan = RangePlan::new(range, 4);
        assert_eq!(plan.part_count, 3);

        assert_eq!(plan.trim(1, Bytes::from_static(b"0123")), "23");
        assert_eq!(plan.trim(2, Bytes::from_static(b"4567")), "4567");
        assert_eq!(plan.trim(3, Bytes::from_static(b"89ab")), "89");
    }

    #[test]
    fn test_trim_single_part_and_short_payload() {
        let plan = RangePlan::new(ByteRange::new(1, 2, 4).unwrap(), 4);
        assert_eq!(plan.trim(1, Bytes::from_static(b"0123")), "12");
        // A short final payload is clamped rather than over-sliced.
        assert_eq!(plan.trim(1, Bytes::from_static(b"0")), "");
    }
}
