//! Core HTTP protocol types

use std::{fmt, ops::BitOr};

#[inline]
pub(crate) fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    bytes.iter().try_fold(0u64, |acc, &byte| {
        if !byte.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add((byte - b'0') as u64)
    })
}

/// `tchar` of RFC 9110, section 5.6.2.
#[inline]
pub(crate) const fn is_token_byte(byte: u8) -> bool {
    matches!(byte,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z'
    )
}

#[inline]
pub(crate) fn is_token(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|&b| is_token_byte(b))
}

// METHOD

/// HTTP request methods understood by the engine
///
/// Any other syntactically valid method token parses to [`Method::Unsupported`]
/// and is answered with `501 Not Implemented`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Unsupported,
}

impl Method {
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Self {
        match src {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"OPTIONS" => Method::Options,
            _ => Method::Unsupported,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Unsupported => "",
        }
    }

    /// `GET` and `HEAD`: methods whose conditional failure is `304`, not `412`.
    #[inline]
    pub const fn is_safe(self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }

    const fn bit(self) -> u8 {
        match self {
            Method::Get => 1,
            Method::Head => 1 << 1,
            Method::Post => 1 << 2,
            Method::Put => 1 << 3,
            Method::Delete => 1 << 4,
            Method::Options => 1 << 5,
            Method::Unsupported => 0,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of methods, as reported by a responder and rendered into `Allow`.
///
/// # Examples
/// ```
/// use maker_http::Methods;
///
/// let methods = Methods::GET | Methods::PUT;
/// assert_eq!(methods.allow().to_string(), "GET, HEAD, PUT, OPTIONS");
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Methods(u8);

impl Methods {
    pub const NONE: Methods = Methods(0);
    pub const GET: Methods = Methods(Method::Get.bit());
    pub const HEAD: Methods = Methods(Method::Head.bit());
    pub const POST: Methods = Methods(Method::Post.bit());
    pub const PUT: Methods = Methods(Method::Put.bit());
    pub const DELETE: Methods = Methods(Method::Delete.bit());
    pub const OPTIONS: Methods = Methods(Method::Options.bit());
    pub const ALL: Methods = Methods(0b11_1111);

    #[inline]
    pub const fn contains(self, method: Method) -> bool {
        let bit = method.bit();
        bit != 0 && self.0 & bit == bit
    }

    /// The set as advertised in `Allow`: `HEAD` follows `GET` and `OPTIONS`
    /// is always present.
    #[inline]
    pub const fn allow(self) -> Methods {
        let mut bits = self.0 | Method::Options.bit();
        if self.0 & Method::Get.bit() != 0 {
            bits |= Method::Head.bit();
        }
        Methods(bits)
    }

    pub fn iter(self) -> impl Iterator<Item = Method> {
        [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Options,
        ]
        .into_iter()
        .filter(move |&m| self.contains(m))
    }
}

impl BitOr for Methods {
    type Output = Methods;

    #[inline]
    fn bitor(self, rhs: Methods) -> Methods {
        Methods(self.0 | rhs.0)
    }
}

impl fmt::Display for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, method) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(method.as_str())?;
        }
        Ok(())
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 - connections close after every response
    ///
    /// [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,

    /// HTTP/1.1 - persistent connections and chunked transfer coding
    ///
    /// [RFC 9112](https://tools.ietf.org/html/rfc9112)
    Http11,
}

impl Version {
    /// `Ok(None)` is a well-formed but unsupported `HTTP/x.y`.
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Option<Self>, ()> {
        match src {
            b"HTTP/1.1" => Ok(Some(Self::Http11)),
            b"HTTP/1.0" => Ok(Some(Self::Http10)),
            [b'H', b'T', b'T', b'P', b'/', major, b'.', minor]
                if major.is_ascii_digit() && minor.is_ascii_digit() =>
            {
                Ok(None)
            }
            _ => Err(()),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($( $name:ident = ($num:expr, $str:expr); )+) => {
        /// HTTP status codes
        ///
        /// Represents the status codes of
        /// [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-15)
        /// and its extensions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            /// Returns the status line, e.g. `b"HTTP/1.1 200 OK\r\n"`.
            #[inline]
            pub(crate) const fn status_line(self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            /// The reason phrase, e.g. `"Not Found"`.
            pub const fn reason(self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non-Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    ExpectationFailed = (417, "Expectation Failed");
    UnprocessableEntity = (422, "Unprocessable Entity");
    PreconditionRequired = (428, "Precondition Required");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl StatusCode {
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// 1xx, 204 and 304 responses never carry a body.
    #[inline]
    pub const fn allows_body(self) -> bool {
        !matches!(self.as_u16(), 100..=199 | 204 | 304)
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self.as_u16(), 200..=299)
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.as_u16() >= 400
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

// HEADER MAP

/// Case-insensitive, order-preserving header multimap.
///
/// Request headers that repeat are folded into one comma-separated value when
/// they are added with [`append`](HeaderMap::append).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderMap {
    headers: Vec<(String, String)>,
}

impl HeaderMap {
    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            headers: Vec::with_capacity(capacity),
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.headers.capacity()
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.headers.clear();
    }

    #[inline]
    fn position(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Value of the first header called `name`.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.headers[i].1.as_str())
    }

    /// Like [`get`](Self::get), but treats an empty value as absent.
    #[inline]
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Sets `name`, replacing every previous value.
    pub fn insert<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();

        match self.position(&name) {
            Some(i) => {
                self.headers[i].1 = value.into();
                let mut j = i + 1;
                while j < self.headers.len() {
                    match self.headers[j].0.eq_ignore_ascii_case(&name) {
                        true => drop(self.headers.remove(j)),
                        false => j += 1,
                    }
                }
            }
            None => self.headers.push((name, value.into())),
        }
    }

    /// Adds a value, joining it onto an existing header of the same name.
    pub fn append<N: Into<String>, V: AsRef<str>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.as_ref();

        match self.position(&name) {
            Some(i) => {
                let separator = match name.eq_ignore_ascii_case("cookie") {
                    true => "; ",
                    false => ", ",
                };
                let joined = &mut self.headers[i].1;
                joined.push_str(separator);
                joined.push_str(value);
            }
            None => self.headers.push((name, value.to_owned())),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let i = self.position(name)?;
        let removed = self.headers.remove(i).1;
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        Some(removed)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut String> {
        let i = self.position(name)?;
        Some(&mut self.headers[i].1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Splits a comma-separated header value into trimmed, non-empty items.
#[inline]
pub(crate) fn list_items(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods() {
        #[rustfmt::skip]
        let cases: [(&[u8], Method); 9] = [
            (b"GET", Method::Get), (b"HEAD", Method::Head), (b"POST", Method::Post),
            (b"PUT", Method::Put), (b"DELETE", Method::Delete),
            (b"OPTIONS", Method::Options), (b"PATCH", Method::Unsupported),
            (b"get", Method::Unsupported), (b"TRACE", Method::Unsupported),
        ];

        for (input, expected) in cases {
            assert_eq!(Method::from_bytes(input), expected);
        }
    }

    #[test]
    fn method_sets() {
        let set = Methods::GET | Methods::POST;

        assert!(set.contains(Method::Get));
        assert!(!set.contains(Method::Head));
        assert!(!set.contains(Method::Unsupported));
        assert!(set.allow().contains(Method::Head));
        assert_eq!(set.to_string(), "GET, POST");
        assert_eq!(set.allow().to_string(), "GET, HEAD, POST, OPTIONS");
        assert_eq!(Methods::NONE.allow().to_string(), "OPTIONS");
        assert_eq!(
            Methods::ALL.to_string(),
            "GET, HEAD, POST, PUT, DELETE, OPTIONS"
        );
    }

    #[test]
    fn versions() {
        #[rustfmt::skip]
        let cases: [(&[u8], Result<Option<Version>, ()>); 6] = [
            (b"HTTP/1.1", Ok(Some(Version::Http11))),
            (b"HTTP/1.0", Ok(Some(Version::Http10))),
            (b"HTTP/2.0", Ok(None)),
            (b"HTTP/0.9", Ok(None)),
            (b"HTTP/1.10", Err(())),
            (b"http/1.1", Err(())),
        ];

        for (input, expected) in cases {
            assert_eq!(Version::from_bytes(input), expected);
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            StatusCode::Ok.status_line(Version::Http11),
            b"HTTP/1.1 200 OK\r\n"
        );
        assert_eq!(
            StatusCode::RangeNotSatisfiable.status_line(Version::Http10),
            b"HTTP/1.0 416 Range Not Satisfiable\r\n"
        );
        assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
        assert!(!StatusCode::NotModified.allows_body());
        assert!(StatusCode::PartialContent.is_success());
    }

    #[test]
    fn header_map() {
        let mut map = HeaderMap::default();

        map.append("Accept", "text/html");
        map.append("accept", "text/plain");
        map.append("Cookie", "a=1");
        map.append("COOKIE", "b=2");
        map.insert("X-One", "1");

        assert_eq!(map.get("ACCEPT"), Some("text/html, text/plain"));
        assert_eq!(map.get("cookie"), Some("a=1; b=2"));
        assert_eq!(map.len(), 3);

        map.insert("x-one", "2");
        assert_eq!(map.get("X-One"), Some("2"));
        assert_eq!(map.remove("X-ONE"), Some("2".to_string()));
        assert!(!map.contains("x-one"));

        map.insert("Expires", "");
        assert!(map.contains("expires"));
        assert_eq!(map.get_non_empty("expires"), None);
    }

    #[test]
    fn numbers_and_tokens() {
        assert_eq!(parse_decimal(b"0"), Some(0));
        assert_eq!(parse_decimal(b"18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_decimal(b"18446744073709551616"), None);
        assert_eq!(parse_decimal(b""), None);
        assert_eq!(parse_decimal(b"+1"), None);

        assert!(is_token(b"X-Custom_Header"));
        assert!(!is_token(b"Bad Header"));
        assert!(!is_token(b""));
    }
}
