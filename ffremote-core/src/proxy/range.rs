use std::fmt;

/// A `Range` header value, before it is checked against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=from-to`
    Bounded { from: u64, to: u64 },
    /// `bytes=from-`
    From(u64),
    /// `bytes=-count`, the last `count` bytes.
    Suffix(u64),
}

impl RangeSpec {
    /// Parses a single byte range. Multi-range values and other units are
    /// rejected.
    pub fn parse(header: &str) -> Option<Self> {
        let (unit, spec) = header.trim().split_once('=')?;
        if !unit.trim().eq_ignore_ascii_case("bytes") || spec.contains(',') {
            return None;
        }
        let (from, to) = spec.trim().split_once('-')?;
        let (from, to) = (from.trim(), to.trim());
        match (from.is_empty(), to.is_empty()) {
            (false, false) => Some(Self::Bounded {
                from: from.parse().ok()?,
                to: to.parse().ok()?,
            }),
            (false, true) => Some(Self::From(from.parse().ok()?)),
            (true, false) => Some(Self::Suffix(to.parse().ok()?)),
            (true, true) => None,
        }
    }

    /// Concrete bytes within a file of `length`, or `None` when the range is
    /// not satisfiable.
    pub fn resolve(self, length: u64) -> Option<ByteRange> {
        match self {
            Self::Bounded { from, to } if from <= to && to < length => Some(ByteRange::new(from, to)),
            Self::From(from) if from < length => Some(ByteRange::new(from, length - 1)),
            Self::Suffix(count) if count > 0 && length > 0 => {
                Some(ByteRange::new(length - count.min(length), length - 1))
            }
            _ => None,
        }
    }
}

/// An inclusive, non-empty byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Parses `bytes=from-to` as sent on a data connection.
    pub fn from_header(text: &str) -> Option<Self> {
        match RangeSpec::parse(text)? {
            RangeSpec::Bounded { from, to } if from <= to => Some(Self::new(from, to)),
            _ => None,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Splits the range into consecutive pieces of at most `size` bytes.
    pub fn chunks(self, size: u64) -> impl Iterator<Item = ByteRange> {
        let size = size.max(1);
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let start = next?;
            let end = start.saturating_add(size - 1).min(self.end);
            next = (end < self.end).then_some(end + 1);
            Some(ByteRange::new(start, end))
        })
    }

    /// `Content-Range` value for a file of `length` bytes.
    pub fn content_range(&self, length: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, length)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_ranges() {
        assert_eq!(
            RangeSpec::parse("bytes=0-99"),
            Some(RangeSpec::Bounded { from: 0, to: 99 })
        );
        assert_eq!(RangeSpec::parse("bytes=100-"), Some(RangeSpec::From(100)));
        assert_eq!(RangeSpec::parse("bytes=-5"), Some(RangeSpec::Suffix(5)));
        assert_eq!(RangeSpec::parse("bytes=0-1,4-5"), None);
        assert_eq!(RangeSpec::parse("items=0-1"), None);
        assert_eq!(RangeSpec::parse("bytes=-"), None);
        assert_eq!(RangeSpec::parse("bytes=a-b"), None);
    }

    #[test]
    fn resolves_against_length() {
        let length = 1000;
        assert_eq!(
            RangeSpec::Bounded { from: 10, to: 19 }.resolve(length),
            Some(ByteRange::new(10, 19))
        );
        assert_eq!(RangeSpec::Bounded { from: 10, to: 1000 }.resolve(length), None);
        assert_eq!(RangeSpec::Bounded { from: 20, to: 10 }.resolve(length), None);
        assert_eq!(RangeSpec::From(0).resolve(length), Some(ByteRange::new(0, 999)));
        assert_eq!(RangeSpec::From(1000).resolve(length), None);
        assert_eq!(RangeSpec::Suffix(10).resolve(length), Some(ByteRange::new(990, 999)));
        assert_eq!(RangeSpec::Suffix(5000).resolve(length), Some(ByteRange::new(0, 999)));
        assert_eq!(RangeSpec::From(0).resolve(0), None);
    }

    #[test]
    fn chunks_cover_range_exactly() {
        let chunks: Vec<_> = ByteRange::new(5, 24).chunks(8).collect();
        assert_eq!(
            chunks,
            vec![ByteRange::new(5, 12), ByteRange::new(13, 20), ByteRange::new(21, 24)]
        );
        assert_eq!(ByteRange::new(0, 0).chunks(8).count(), 1);
    }

    #[test]
    fn header_forms() {
        let range = ByteRange::new(0, 65535);
        assert_eq!(range.to_string(), "bytes=0-65535");
        assert_eq!(ByteRange::from_header("bytes=0-65535"), Some(range));
        assert_eq!(ByteRange::from_header("bytes=0-"), None);
        assert_eq!(range.content_range(70000), "bytes 0-65535/70000");
        assert_eq!(range.len(), 65536);
    }
}
