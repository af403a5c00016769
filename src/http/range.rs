//! `Range` request header

use super::types::parse_decimal;

/// One `byte-range-spec` as sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `first-last`
    Closed(u64, u64),
    /// `first-`
    From(u64),
    /// `-suffix_length`
    Suffix(u64),
}

/// A satisfiable range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub const fn len(self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value, e.g. `bytes 0-49/100`.
    #[inline]
    pub(crate) fn content_range(self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parsed value of a `Range: bytes=...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeList {
    ranges: Vec<ByteRange>,
}

impl RangeList {
    /// Parses a `Range` header.
    ///
    /// Anything unusable yields `None`, and the caller then ignores the header
    /// and serves the full representation: other units, syntax errors, a
    /// `first` past `last`, and ranges that overlap or go backwards.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (unit, set) = value.split_once('=')?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return None;
        }

        let mut ranges = Vec::new();
        let mut covered: Option<u64> = None;

        for item in set.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (first, last) = item.split_once('-')?;
            let (first, last) = (first.trim(), last.trim());

            let number = |s: &str| match s.is_empty() {
                true => Ok(None),
                false => parse_decimal(s.as_bytes()).map(Some).ok_or(()),
            };

            let range = match (number(first).ok()?, number(last).ok()?) {
                (Some(first), Some(last)) if first <= last => ByteRange::Closed(first, last),
                (Some(first), None) => ByteRange::From(first),
                (None, Some(suffix)) => ByteRange::Suffix(suffix),
                _ => return None,
            };

            match range {
                ByteRange::Closed(first, _) | ByteRange::From(first) => {
                    if covered.is_some_and(|covered| first <= covered) {
                        return None;
                    }
                }
                ByteRange::Suffix(_) => {}
            }
            covered = match range {
                ByteRange::Closed(_, last) => Some(last),
                ByteRange::From(_) => Some(u64::MAX),
                ByteRange::Suffix(_) => covered,
            };

            ranges.push(range);
        }

        match ranges.is_empty() {
            true => None,
            false => Some(Self { ranges }),
        }
    }

    #[inline]
    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// Resolves the list against a representation of `total` bytes.
    ///
    /// Ranges starting at or past the end are dropped and `last` is clamped to
    /// the final byte. `None` means nothing is satisfiable (`416`).
    pub fn resolve(&self, total: u64) -> Option<Vec<Span>> {
        if total == 0 {
            return None;
        }

        let spans: Vec<Span> = self
            .ranges
            .iter()
            .filter_map(|&range| match range {
                ByteRange::Closed(start, _) | ByteRange::From(start) if start >= total => None,
                ByteRange::Closed(start, end) => Some(Span {
                    start,
                    end: end.min(total - 1),
                }),
                ByteRange::From(start) => Some(Span {
                    start,
                    end: total - 1,
                }),
                ByteRange::Suffix(0) => None,
                ByteRange::Suffix(len) => Some(Span {
                    start: total.saturating_sub(len),
                    end: total - 1,
                }),
            })
            .collect();

        match spans.is_empty() {
            true => None,
            false => Some(spans),
        }
    }
}
