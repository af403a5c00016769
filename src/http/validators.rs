//! Cache validators, conditional requests and caching headers
//!
//! A responder describes the state of a resource with [`ResourceInfo`]. The
//! engine evaluates the request's preconditions against it before dispatch
//! and derives `Cache-Control`, `Pragma` and `Expires` from it afterwards.

use super::types::{HeaderMap, Method, StatusCode};
use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Formats a time as an RFC 1123 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
#[inline]
pub fn fmt_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Parses RFC 1123, RFC 850 and `asctime` dates.
#[inline]
pub fn parse_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

// HTTP dates carry whole seconds.
#[inline]
fn secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

// ETAG

/// An entity tag, strong (`"xyzzy"`) or weak (`W/"xyzzy"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityTag {
    weak: bool,
    tag: String,
}

impl EntityTag {
    /// # Panics
    /// If `tag` contains a double quote or a control character.
    #[track_caller]
    pub fn strong<T: Into<String>>(tag: T) -> Self {
        Self::new(false, tag.into())
    }

    /// # Panics
    /// If `tag` contains a double quote or a control character.
    #[track_caller]
    pub fn weak<T: Into<String>>(tag: T) -> Self {
        Self::new(true, tag.into())
    }

    #[track_caller]
    fn new(weak: bool, tag: String) -> Self {
        assert!(
            tag.bytes().all(is_etag_byte),
            "invalid entity tag: {tag:?}"
        );
        Self { weak, tag }
    }

    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    pub const fn is_weak(&self) -> bool {
        self.weak
    }

    /// Strong comparison: both strong and character-identical.
    #[inline]
    pub fn strong_eq(&self, other: &EntityTag) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }

    /// Weak comparison: identical opaque tags, either may be weak.
    #[inline]
    pub fn weak_eq(&self, other: &EntityTag) -> bool {
        self.tag == other.tag
    }

    /// Parses one tag, returning it with the unparsed rest of `src`.
    fn parse_prefix(src: &str) -> Option<(Self, &str)> {
        let (weak, src) = match src.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, src),
        };

        let body = src.strip_prefix('"')?;
        let end = body.find('"')?;
        let tag = &body[..end];

        match tag.bytes().all(is_etag_byte) {
            true => Some((Self { weak, tag: tag.to_owned() }, &body[end + 1..])),
            false => None,
        }
    }

    /// Parses a single entity tag, as found in `If-Range`.
    pub fn parse(src: &str) -> Option<Self> {
        match Self::parse_prefix(src.trim())? {
            (tag, "") => Some(tag),
            _ => None,
        }
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.weak {
            true => write!(f, "W/\"{}\"", self.tag),
            false => write!(f, "\"{}\"", self.tag),
        }
    }
}

#[inline]
const fn is_etag_byte(byte: u8) -> bool {
    matches!(byte, 0x21 | 0x23..=0x7e | 0x80..=0xff)
}

/// Value of `If-Match` / `If-None-Match`.
#[derive(Debug, PartialEq)]
enum TagList {
    Any,
    Tags(Vec<EntityTag>),
}

impl TagList {
    /// A malformed list keeps the tags parsed before the error.
    fn parse(value: &str) -> Self {
        if value.trim() == "*" {
            return Self::Any;
        }

        let mut tags = Vec::new();
        let mut rest = value;

        loop {
            rest = rest.trim_start_matches(|c| c == ',' || c == ' ' || c == '\t');
            if rest.is_empty() {
                break;
            }
            match EntityTag::parse_prefix(rest) {
                Some((tag, tail)) => {
                    tags.push(tag);
                    rest = tail;
                }
                None => break,
            }
        }

        Self::Tags(tags)
    }

    fn matches<F>(&self, current: Option<&EntityTag>, eq: F) -> bool
    where
        F: Fn(&EntityTag, &EntityTag) -> bool,
    {
        match (self, current) {
            (Self::Any, current) => current.is_some(),
            (Self::Tags(_), None) => false,
            (Self::Tags(tags), Some(current)) => tags.iter().any(|tag| eq(tag, current)),
        }
    }
}

// RESOURCE

/// Cache directives a responder reports for a response.
///
/// The per-header lists produce the field-name forms of `private` and
/// `no-cache`, e.g. `no-cache="Set-Cookie"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub no_transform: bool,

    pub private_headers: Vec<String>,
    pub no_cache_headers: Vec<String>,
}

/// What a responder knows about the current state of a resource.
///
/// Every field defaults to "unknown"; unknown validators never satisfy a
/// precondition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    pub last_modified: Option<SystemTime>,
    pub etag: Option<EntityTag>,
    pub expires: Option<SystemTime>,
    pub cache: CachePolicy,
}

impl ResourceInfo {
    /// A modification time in the future is reported as `now`.
    #[inline]
    pub(crate) fn clamp(mut self, now: SystemTime) -> Self {
        self.last_modified = self.last_modified.map(|time| time.min(now));
        self
    }
}

// PRECONDITIONS

/// Evaluates the request's preconditions against the resource, in the order
/// `If-Modified-Since`, `If-Unmodified-Since`, `If-Match`, `If-None-Match`,
/// `If-Range`.
///
/// Returns the status that replaces dispatch (`304` or `412`), or `None` to
/// proceed. A failed `If-Range` removes `Range` from `headers`, so the request
/// degrades to a full response.
pub(crate) fn evaluate(
    method: Method,
    headers: &mut HeaderMap,
    info: &ResourceInfo,
    now: SystemTime,
) -> Option<StatusCode> {
    let last_modified = info.last_modified.map(secs);
    let etag = info.etag.as_ref();

    if method.is_safe() {
        let since = headers.get("if-modified-since").and_then(parse_date);

        if let (Some(since), Some(last_modified)) = (since, last_modified) {
            if since <= now && last_modified <= secs(since) {
                return Some(StatusCode::NotModified);
            }
        }
    }

    let since = headers.get("if-unmodified-since").and_then(parse_date);
    if let (Some(since), Some(last_modified)) = (since, last_modified) {
        if last_modified > secs(since) {
            return Some(StatusCode::PreconditionFailed);
        }
    }

    if let Some(value) = headers.get("if-match") {
        if !TagList::parse(value).matches(etag, EntityTag::strong_eq) {
            return Some(StatusCode::PreconditionFailed);
        }
    }

    if let Some(value) = headers.get("if-none-match") {
        if TagList::parse(value).matches(etag, EntityTag::weak_eq) {
            return Some(match method.is_safe() {
                true => StatusCode::NotModified,
                false => StatusCode::PreconditionFailed,
            });
        }
    }

    if headers.contains("range") {
        if let Some(value) = headers.get("if-range") {
            if !if_range_matches(value, etag, last_modified) {
                headers.remove("range");
            }
        }
    }

    None
}

fn if_range_matches(value: &str, etag: Option<&EntityTag>, last_modified: Option<u64>) -> bool {
    let value = value.trim();

    if value.starts_with('"') || value.starts_with("W/") {
        return match (EntityTag::parse(value), etag) {
            (Some(tag), Some(current)) => tag.strong_eq(current),
            _ => false,
        };
    }

    match (parse_date(value), last_modified) {
        (Some(date), Some(last_modified)) => secs(date) == last_modified,
        _ => false,
    }
}

// CACHE HEADERS

/// Fills the pre-seeded `Cache-Control`, `Pragma` and `Expires` headers.
pub(crate) fn cache_headers(headers: &mut HeaderMap, info: &ResourceInfo, now: SystemTime) {
    let policy = &info.cache;
    let mut directives = Vec::new();

    if policy.private {
        directives.push("private".to_owned());
    }
    if !policy.private_headers.is_empty() {
        directives.push(format!("private=\"{}\"", policy.private_headers.join(", ")));
    }
    if policy.no_cache {
        directives.push("no-cache".to_owned());
    }
    if !policy.no_cache_headers.is_empty() {
        directives.push(format!("no-cache=\"{}\"", policy.no_cache_headers.join(", ")));
    }
    if policy.no_store {
        directives.push("no-store".to_owned());
    }
    if policy.no_transform {
        directives.push("no-transform".to_owned());
    }
    if let Some(expires) = info.expires {
        let max_age = expires.duration_since(now).unwrap_or(Duration::ZERO);
        directives.push(format!("max-age={}", max_age.as_secs()));
    }

    if !directives.is_empty() {
        headers.insert("Cache-Control", directives.join(", "));
    }
    if policy.no_cache {
        headers.insert("Pragma", "no-cache");
    }

    let uncacheable = policy.private
        || policy.no_cache
        || !policy.private_headers.is_empty()
        || !policy.no_cache_headers.is_empty();

    match (uncacheable, info.expires) {
        (true, _) => headers.insert("Expires", "0"),
        (false, Some(expires)) => headers.insert("Expires", fmt_date(expires)),
        (false, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 784_111_777; // Sun, 06 Nov 1994 08:49:37 GMT

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn info(last_modified: Option<u64>, etag: Option<&str>) -> ResourceInfo {
        ResourceInfo {
            last_modified: last_modified.map(at),
            etag: etag.map(EntityTag::strong),
            ..ResourceInfo::default()
        }
    }

    #[test]
    fn dates() {
        for input in [
            "Sun, 06 Nov 1994 08:49:37 GMT",
            "Sunday, 06-Nov-94 08:49:37 GMT",
            "Sun Nov  6 08:49:37 1994",
        ] {
            assert_eq!(parse_date(input), Some(at(T0)), "{input}");
        }

        assert_eq!(fmt_date(at(T0)), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn entity_tags() {
        #[rustfmt::skip]
        let cases = [
            ("\"abc\"", Some(EntityTag::strong("abc"))),
            ("W/\"abc\"", Some(EntityTag::weak("abc"))),
            (" \"\" ", Some(EntityTag::strong(""))),
            ("abc", None),
            ("\"abc", None),
            ("\"a\"b", None),
            ("w/\"abc\"", None),
        ];

        for (input, expected) in cases {
            assert_eq!(EntityTag::parse(input), expected, "{input:?}");
        }

        assert_eq!(EntityTag::weak("x").to_string(), "W/\"x\"");
        assert!(EntityTag::weak("x").weak_eq(&EntityTag::strong("x")));
        assert!(!EntityTag::weak("x").strong_eq(&EntityTag::strong("x")));
    }

    #[test]
    fn tag_lists() {
        assert_eq!(TagList::parse(" * "), TagList::Any);
        assert_eq!(
            TagList::parse("\"a\", W/\"b,c\" ,\"d\""),
            TagList::Tags(vec![
                EntityTag::strong("a"),
                EntityTag::weak("b,c"),
                EntityTag::strong("d"),
            ])
        );
        assert_eq!(
            TagList::parse("\"a\", bogus, \"d\""),
            TagList::Tags(vec![EntityTag::strong("a")])
        );
    }

    #[test]
    #[should_panic(expected = "invalid entity tag")]
    fn quote_in_tag() {
        EntityTag::strong("a\"b");
    }

    #[test]
    fn preconditions() {
        let lm = "Sun, 06 Nov 1994 08:49:37 GMT";
        let before = "Sun, 06 Nov 1994 08:49:36 GMT";
        let future = "Fri, 01 Jan 2100 00:00:00 GMT";

        let tagged = info(Some(T0), Some("v1"));
        let untagged = info(None, None);

        use Method::*;
        use StatusCode::*;

        #[rustfmt::skip]
        let cases: [(Method, &str, &str, &ResourceInfo, Option<StatusCode>); 22] = [
            (Get, "If-None-Match", "*", &tagged, Some(NotModified)),
            (Put, "If-None-Match", "*", &tagged, Some(PreconditionFailed)),
            (Get, "If-None-Match", "*", &untagged, None),
            (Head, "If-None-Match", "W/\"v1\"", &tagged, Some(NotModified)),
            (Delete, "If-None-Match", "\"v0\", \"v1\"", &tagged, Some(PreconditionFailed)),
            (Get, "If-None-Match", "\"v2\"", &tagged, None),

            (Put, "If-Match", "\"nonexistent\"", &tagged, Some(PreconditionFailed)),
            (Put, "If-Match", "\"v1\"", &tagged, None),
            (Put, "If-Match", "W/\"v1\"", &tagged, Some(PreconditionFailed)),
            (Put, "If-Match", "*", &tagged, None),
            (Put, "If-Match", "*", &untagged, Some(PreconditionFailed)),
            (Put, "If-Match", "\"v1\"", &untagged, Some(PreconditionFailed)),

            (Get, "If-Modified-Since", lm, &tagged, Some(NotModified)),
            (Get, "If-Modified-Since", before, &tagged, None),
            (Get, "If-Modified-Since", future, &tagged, None),
            (Get, "If-Modified-Since", "garbage", &tagged, None),
            (Get, "If-Modified-Since", lm, &untagged, None),
            (Post, "If-Modified-Since", lm, &tagged, None),

            (Put, "If-Unmodified-Since", lm, &tagged, None),
            (Put, "If-Unmodified-Since", before, &tagged, Some(PreconditionFailed)),
            (Get, "If-Unmodified-Since", before, &tagged, Some(PreconditionFailed)),
            (Put, "If-Unmodified-Since", before, &untagged, None),
        ];

        for (method, name, value, info, expected) in cases {
            let mut headers = HeaderMap::default();
            headers.insert(name, value);

            let result = evaluate(method, &mut headers, info, at(T0 + 60));
            assert_eq!(result, expected, "{method} {name}: {value}");
        }
    }

    #[test]
    fn if_modified_since_comes_first() {
        let resource = info(Some(T0), Some("v1"));

        #[rustfmt::skip]
        let cases = [
            ("Sun, 06 Nov 1994 08:49:37 GMT", "\"other\"", Some(StatusCode::NotModified)),
            ("Sun, 06 Nov 1994 08:49:37 GMT", "\"v1\"", Some(StatusCode::NotModified)),
            ("Sun, 06 Nov 1994 08:49:36 GMT", "\"other\"", None),
            ("Sun, 06 Nov 1994 08:49:36 GMT", "\"v1\"", Some(StatusCode::NotModified)),
        ];

        for (since, tags, expected) in cases {
            let mut headers = HeaderMap::default();
            headers.insert("If-Modified-Since", since);
            headers.insert("If-None-Match", tags);

            let result = evaluate(Method::Get, &mut headers, &resource, at(T0));
            assert_eq!(result, expected, "{since} / {tags}");
        }
    }

    #[test]
    fn if_range() {
        let resource = info(Some(T0), Some("v1"));

        #[rustfmt::skip]
        let cases = [
            ("\"v1\"", true),
            ("\"v2\"", false),
            ("W/\"v1\"", false),
            ("Sun, 06 Nov 1994 08:49:37 GMT", true),
            ("Sun, 06 Nov 1994 08:49:38 GMT", false),
            ("nonsense", false),
        ];

        for (value, keeps_range) in cases {
            let mut headers = HeaderMap::default();
            headers.insert("Range", "bytes=0-1");
            headers.insert("If-Range", value);

            assert_eq!(evaluate(Method::Get, &mut headers, &resource, at(T0)), None);
            assert_eq!(headers.contains("range"), keeps_range, "{value}");
        }
    }

    #[test]
    fn clamped_to_now() {
        let resource = info(Some(T0 + 3600), None).clamp(at(T0));
        assert_eq!(resource.last_modified, Some(at(T0)));
    }

    #[test]
    fn caching_headers() {
        let now = at(T0);

        let run = |info: ResourceInfo| {
            let mut headers = HeaderMap::default();
            for name in ["Expires", "Cache-Control", "Pragma"] {
                headers.insert(name, "");
            }
            cache_headers(&mut headers, &info, now);
            (
                headers.get("cache-control").unwrap_or("").to_owned(),
                headers.get("pragma").unwrap_or("").to_owned(),
                headers.get("expires").unwrap_or("").to_owned(),
            )
        };

        let expiring = ResourceInfo {
            expires: Some(at(T0 + 300)),
            ..ResourceInfo::default()
        };
        assert_eq!(
            run(expiring.clone()),
            ("max-age=300".into(), "".into(), "Sun, 06 Nov 1994 08:54:37 GMT".into())
        );

        let private = ResourceInfo {
            cache: CachePolicy {
                private: true,
                no_transform: true,
                ..CachePolicy::default()
            },
            ..expiring.clone()
        };
        assert_eq!(
            run(private),
            ("private, no-transform, max-age=300".into(), "".into(), "0".into())
        );

        let per_header = ResourceInfo {
            cache: CachePolicy {
                no_cache: true,
                no_store: true,
                no_cache_headers: vec!["Set-Cookie".into(), "X-Token".into()],
                ..CachePolicy::default()
            },
            ..ResourceInfo::default()
        };
        assert_eq!(
            run(per_header),
            (
                "no-cache, no-cache=\"Set-Cookie, X-Token\", no-store".into(),
                "no-cache".into(),
                "0".into()
            )
        );

        let private_header = ResourceInfo {
            cache: CachePolicy {
                private_headers: vec!["Authorization".into()],
                ..CachePolicy::default()
            },
            ..expiring
        };
        assert_eq!(run(private_header).2, "0");

        assert_eq!(run(ResourceInfo::default()), ("".into(), "".into(), "".into()));
    }
}
