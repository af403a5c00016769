//! Query string and `application/x-www-form-urlencoded` parsing

use memchr::memchr;
use std::collections::HashMap;
use thiserror::Error;

/// Zero-copy `key=value&...` splitter.
///
/// Raw pairs borrow from the input. Collect into [`Decoded`] to get
/// percent- and plus-decoded owned strings instead.
///
/// # Examples
/// ```
/// use maker_http::query::{Decoded, Query};
///
/// let raw: Vec<(&[u8], &[u8])> = Query::parse(b"debug&name=&=Qwe&key=sda&&", 10).unwrap();
/// assert_eq!(raw.len(), 5);
/// assert!(raw[0] == (b"debug", b""));
/// assert!(raw[2] == (b"", b"Qwe"));
///
/// let Decoded(form) = Query::parse(b"?name=J%C3%BCrgen+M&x=%2B1", 10).unwrap();
/// assert_eq!(form[0], ("name".to_string(), "Jürgen M".to_string()));
/// assert_eq!(form[1], ("x".to_string(), "+1".to_string()));
/// ```
pub struct Query;

impl Query {
    /// Parses `query` into a new collection. A leading `?` is skipped.
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(query: &'a [u8], limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses `query`, appending to `result`.
    ///
    /// Fails once `result` would hold more than `limit` parameters.
    #[inline]
    pub fn parse_into<'a, C: QueryCollector<'a>>(
        result: &mut C,
        query: &'a [u8],
        limit: usize,
    ) -> Result<(), Error> {
        let data = match query.first().ok_or(Error::Empty)? {
            b'?' => &query[1..],
            _ => query,
        };

        let mut start = 0;
        while start < data.len() {
            if result.length() >= limit {
                return Err(Error::OverLimit(limit));
            }

            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let split = start + memchr(b'=', &data[start..end]).unwrap_or(end - start);

            let key = &data[start..split];
            let value = match split < end {
                true => &data[split + 1..end],
                false => b"",
            };

            result.add_param(key, value);
            start = end + 1;
        }

        Ok(())
    }
}

/// Decodes one form component: `+` is a space, then `%XX` escapes.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub fn decode_component(raw: &[u8]) -> String {
    let plus_free: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();

    String::from_utf8_lossy(&urlencoding::decode_binary(&plus_free)).into_owned()
}

/// Storage for parsed parameters.
///
/// # Examples
/// ```rust
/// use maker_http::query::QueryCollector;
///
/// struct Keys(Vec<String>);
///
/// impl<'a> QueryCollector<'a> for Keys {
///     fn add_param(&mut self, key: &'a [u8], _: &'a [u8]) {
///         self.0.push(String::from_utf8_lossy(key).into_owned());
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Keys(Vec::with_capacity(capacity))
///     }
/// }
/// ```
pub trait QueryCollector<'a>
where
    Self: Sized,
{
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]);

    // `length` instead of `len`, so clippy does not ask for `is_empty`
    fn length(&self) -> usize;

    fn with_capacity(capacity: usize) -> Self;
}

// Preserves order
impl<'a> QueryCollector<'a> for Vec<(&'a [u8], &'a [u8])> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Last value wins
impl<'a> QueryCollector<'a> for HashMap<&'a [u8], &'a [u8]> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

/// Owned, decoded pairs in order. Empty `&&` segments are skipped but still
/// count towards the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded(pub Vec<(String, String)>);

impl<'a> QueryCollector<'a> for Decoded {
    fn add_param(&mut self, key: &'a [u8], value: &'a [u8]) {
        self.0.push((decode_component(key), decode_component(value)));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.0.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Decoded(Vec::with_capacity(capacity))
    }
}

impl Decoded {
    #[inline]
    pub(crate) fn into_pairs(self) -> impl Iterator<Item = (String, String)> {
        self.0
            .into_iter()
            .filter(|(key, value)| !key.is_empty() || !value.is_empty())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// More parameters than the given limit.
    #[error("query parameter limit exceeded: limit={0}")]
    OverLimit(usize),

    /// Nothing to parse: empty input or a lone `?`.
    #[error("query string is empty")]
    Empty,
}
