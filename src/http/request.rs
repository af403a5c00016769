//! Request head parsing and the owned request model

use crate::{
    errors::ErrorKind,
    http::{
        query::{Decoded, Query},
        types::{is_token, HeaderMap, Method, Version},
    },
    limits::ReqLimits,
    server::responder::{dummy_host, Host},
};
use std::{
    borrow::Cow,
    fmt,
    io::{BufRead, Read},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

/// Blank lines tolerated before a request line.
const MAX_LEADING_EMPTY_LINES: usize = 4;

/// A parsed HTTP request.
///
/// # Wire format
///
/// ```text
/// [METHOD] SP [TARGET] SP HTTP/1.x CRLF
/// ([NAME] ":" OWS [VALUE] OWS CRLF)*
/// CRLF
/// ```
///
/// - Lines end in exactly `CRLF`. Blank lines before the request line are
///   skipped.
/// - `[TARGET]` is origin-form (`/path?query`), absolute-form
///   (`http://host/path`) or, for `OPTIONS` only, `*`. Dot segments are
///   removed and a fragment is dropped.
/// - Header lines starting with SP or HT continue the previous value and are
///   joined with a single space.
/// - Repeated headers are joined with `", "`, `Cookie` with `"; "`.
/// - `Host` is mandatory for HTTP/1.1. An absolute-form target's authority
///   takes precedence over it.
/// - The head must be valid UTF-8.
///
/// Methods other than `GET`, `HEAD`, `POST`, `PUT`, `DELETE` and `OPTIONS`
/// parse as [`Method::Unsupported`].
///
/// The request is reused across a persistent connection and cleared between
/// requests.
pub struct Request {
    method: Method,
    target: String,
    path: String,
    query: Option<String>,
    version: Version,
    headers: HeaderMap,

    cookies: Vec<(String, String)>,
    keywords: Vec<Keyword>,
    body: Vec<u8>,

    pub(crate) route: String,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) client_addr: SocketAddr,
}

/// One decoded form field.
///
/// `filename` and `content_type` are only set for `multipart/form-data` parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub name: String,
    pub value: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl Keyword {
    pub(crate) fn text<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into().into_bytes(),
            filename: None,
            content_type: None,
        }
    }

    /// The value as text, if it is UTF-8.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.value).ok()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("host", &self.host.name())
            .field("client_addr", &self.client_addr)
            .finish_non_exhaustive()
    }
}

impl Request {
    const UNKNOWN_CLIENT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

    #[inline]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            target: String::new(),
            path: String::new(),
            query: None,
            version: Version::Http11,
            headers: HeaderMap::with_capacity(limits.header_count.min(32)),

            cookies: Vec::new(),
            keywords: Vec::new(),
            body: Vec::new(),

            route: String::new(),
            host: dummy_host(),
            client_addr: Self::UNKNOWN_CLIENT,
        }
    }

    /// Clears the request for the next one on the same connection.
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.target.clear();
        self.path.clear();
        self.query = None;
        self.version = Version::Http11;
        self.headers.clear();

        self.cookies.clear();
        self.keywords.clear();
        self.body.clear();

        self.route.clear();
        self.host = dummy_host();
    }

    #[inline]
    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[inline]
    pub(crate) fn set_keywords(&mut self, keywords: Vec<Keyword>) {
        self.keywords = keywords;
    }

    #[inline]
    pub(crate) fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// The request target exactly as received.
    #[inline(always)]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Normalized path: no query, no fragment, no dot segments.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the `?`.
    #[inline(always)]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Decoded query parameters, at most `limit` of them.
    pub fn query_params(&self, limit: usize) -> Result<Vec<(String, String)>, crate::query::Error> {
        match self.query.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(query) => {
                let decoded: Decoded = Query::parse(query.as_bytes(), limit)?;
                Ok(decoded.into_pairs().collect())
            }
        }
    }

    /// Identifier of the route that matched, as reported by the router.
    #[inline(always)]
    pub fn route(&self) -> &str {
        &self.route
    }

    #[inline(always)]
    pub fn host(&self) -> &dyn Host {
        &*self.host
    }

    #[inline(always)]
    pub const fn client_addr(&self) -> &SocketAddr {
        &self.client_addr
    }

    #[inline(always)]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, case-insensitive.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline(always)]
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// Value of the first cookie called `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Form fields decoded from the entity.
    #[inline(always)]
    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    pub fn keyword(&self, name: &str) -> Option<&Keyword> {
        self.keywords.iter().find(|k| k.name == name)
    }

    /// Entity bytes that were not decoded into keywords.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

// Parsing
impl Request {
    /// Reads one request head, request line then header fields.
    #[cfg(test)]
    pub(crate) fn read_head<R: BufRead>(
        &mut self,
        io: &mut R,
        limits: &ReqLimits,
    ) -> Result<(), ErrorKind> {
        let authority = self.read_request_line(io, limits)?;
        self.read_headers(io, limits, authority)
    }

    /// Reads and parses the request line, skipping a few leading blank lines.
    ///
    /// The version is recorded as soon as it is known, so errors after the
    /// request line are answered in the client's version. Returns the
    /// authority of an absolute-form target.
    pub(crate) fn read_request_line<R: BufRead>(
        &mut self,
        io: &mut R,
        limits: &ReqLimits,
    ) -> Result<Option<String>, ErrorKind> {
        let mut line = Vec::with_capacity(256);

        let mut skipped = 0;
        loop {
            read_line(io, &mut line, limits.request_line(), ErrorKind::UriTooLong)?;
            if !line.is_empty() {
                break;
            }
            skipped += 1;
            if skipped > MAX_LEADING_EMPTY_LINES {
                return Err(ErrorKind::BadFormat("empty request line"));
            }
        }

        self.parse_request_line(&line, limits)
    }

    /// Reads the header fields up to the empty line. `authority`, from an
    /// absolute-form target, overrides `Host`.
    pub(crate) fn read_headers<R: BufRead>(
        &mut self,
        io: &mut R,
        limits: &ReqLimits,
        authority: Option<String>,
    ) -> Result<(), ErrorKind> {
        let mut line = Vec::with_capacity(256);
        self.parse_headers(io, &mut line, limits)?;

        if let Some(authority) = authority {
            self.headers.insert("Host", authority);
        }
        if self.version == Version::Http11 && !self.headers.contains("host") {
            return Err(ErrorKind::BadFormat("missing Host"));
        }

        self.cookies = self
            .headers
            .get("cookie")
            .map(parse_cookies)
            .unwrap_or_default();

        Ok(())
    }

    fn parse_request_line(
        &mut self,
        line: &[u8],
        limits: &ReqLimits,
    ) -> Result<Option<String>, ErrorKind> {
        let line = simdutf8::basic::from_utf8(line)
            .map_err(|_| ErrorKind::BadFormat("request line is not UTF-8"))?;

        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ErrorKind::BadFormat("request line"));
        };

        self.version = match Version::from_bytes(version.as_bytes()) {
            Ok(Some(version)) => version,
            Ok(None) => return Err(ErrorKind::UnsupportedVersion),
            Err(()) => return Err(ErrorKind::BadFormat("version")),
        };

        if !is_token(method.as_bytes()) {
            return Err(ErrorKind::BadFormat("method"));
        }
        self.method = Method::from_bytes(method.as_bytes());

        if target.len() > limits.url_size {
            return Err(ErrorKind::UriTooLong);
        }
        if target.is_empty() || target.bytes().any(|b| b.is_ascii_control()) {
            return Err(ErrorKind::BadFormat("request target"));
        }
        self.target.push_str(target);

        if target == "*" {
            if self.method != Method::Options {
                return Err(ErrorKind::BadFormat("asterisk-form without OPTIONS"));
            }
            self.path.push('*');
            return Ok(None);
        }

        let (authority, origin) = split_absolute_form(target)?;

        let origin = origin.split('#').next().unwrap_or(origin);
        let (path, query) = match origin.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (origin, None),
        };

        self.path = remove_dot_segments(path).into_owned();
        self.query = query.map(str::to_owned);

        Ok(authority.map(str::to_owned))
    }

    fn parse_headers<R: BufRead>(
        &mut self,
        io: &mut R,
        line: &mut Vec<u8>,
        limits: &ReqLimits,
    ) -> Result<(), ErrorKind> {
        let mut last: Option<String> = None;
        let mut count = 0;

        loop {
            read_line(io, line, limits.header_line(), ErrorKind::HeaderTooLarge)?;
            if line.is_empty() {
                return Ok(());
            }

            let text = simdutf8::basic::from_utf8(line)
                .map_err(|_| ErrorKind::BadFormat("header is not UTF-8"))?;

            if text.starts_with([' ', '\t']) {
                let name = last
                    .as_deref()
                    .ok_or(ErrorKind::BadFormat("continuation before first header"))?;
                let value = self
                    .headers
                    .get_mut(name)
                    .ok_or(ErrorKind::BadFormat("continuation"))?;

                let folded = text.trim_matches([' ', '\t']);
                if !folded.is_empty() {
                    if value.len() + 1 + folded.len() > limits.header_value_size {
                        return Err(ErrorKind::HeaderTooLarge);
                    }
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(folded);
                }
                continue;
            }

            count += 1;
            if count > limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }

            let (name, value) = text
                .split_once(':')
                .ok_or(ErrorKind::BadFormat("header without colon"))?;
            if !is_token(name.as_bytes()) {
                return Err(ErrorKind::BadFormat("header name"));
            }

            let value = value.trim_matches([' ', '\t']);
            if name.len() > limits.header_name_size || value.len() > limits.header_value_size {
                return Err(ErrorKind::HeaderTooLarge);
            }

            self.headers.append(name, value);
            last = Some(name.to_owned());
        }
    }
}

/// Reads one CRLF-terminated line into `line`, without the CRLF.
///
/// A peer that closes mid-line is treated like one that closed between
/// requests: there is nobody left to answer.
fn read_line<R: BufRead>(
    io: &mut R,
    line: &mut Vec<u8>,
    max: usize,
    too_long: ErrorKind,
) -> Result<(), ErrorKind> {
    line.clear();

    let limit = max as u64 + 2;
    let read = io.by_ref().take(limit).read_until(b'\n', line)?;

    match (read, line.last()) {
        (0, _) => return Err(ErrorKind::RemoteClosed),
        (_, Some(b'\n')) => {}
        (read, _) if read as u64 == limit => return Err(too_long),
        _ => return Err(ErrorKind::RemoteClosed),
    }

    if !line.ends_with(b"\r\n") {
        return Err(ErrorKind::BadFormat("line not terminated by CRLF"));
    }
    line.truncate(line.len() - 2);
    Ok(())
}

/// Splits `http://authority/path` into its authority and origin-form.
fn split_absolute_form(target: &str) -> Result<(Option<&str>, &str), ErrorKind> {
    if target.starts_with('/') {
        return Ok((None, target));
    }

    let scheme_end = target
        .find("://")
        .ok_or(ErrorKind::BadFormat("request target"))?;
    let scheme = &target[..scheme_end];
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return Err(ErrorKind::BadFormat("request target scheme"));
    }

    let rest = &target[scheme_end + 3..];
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, origin) = rest.split_at(end);

    let authority = authority.rsplit('@').next().unwrap_or(authority);
    if authority.is_empty() {
        return Err(ErrorKind::BadFormat("empty authority"));
    }

    Ok((Some(authority), if origin.is_empty() { "/" } else { origin }))
}

/// RFC 3986, section 5.2.4, for absolute paths.
fn remove_dot_segments(path: &str) -> Cow<'_, str> {
    let dotted = path
        .split('/')
        .any(|segment| segment == "." || segment == "..");
    if !dotted {
        return Cow::Borrowed(if path.is_empty() { "/" } else { path });
    }

    let mut output: Vec<&str> = Vec::new();
    let segments: Vec<&str> = path.split('/').skip(1).collect();

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        match *segment {
            "." => {
                if last {
                    output.push("");
                }
            }
            ".." => {
                output.pop();
                if last {
                    output.push("");
                }
            }
            segment => output.push(segment),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in &output {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    Cow::Owned(normalized)
}

/// Splits a `Cookie` header into decoded name/value pairs.
fn parse_cookies(header: &str) -> Vec<(String, String)> {
    let decode = |s: &str| -> String {
        urlencoding::decode(s).map_or_else(|_| s.to_owned(), Cow::into_owned)
    };

    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| {
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (decode(name), decode(value))
        })
        .collect()
}
