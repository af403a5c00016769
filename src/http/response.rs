//! Response model: status, headers, cookies and per-encoding bodies

use crate::{
    http::{
        encoding::Encoding,
        types::{HeaderMap, StatusCode},
        validators::fmt_date,
    },
    limits::RespLimits,
    BodyWriter, WriteBuffer,
};
use std::{
    collections::BTreeMap,
    fmt,
    io::{Read, Seek},
    time::SystemTime,
};

/// Headers every response starts with, empty, so caching logic can fill them.
const PRESEEDED: [&str; 3] = ["Expires", "Cache-Control", "Pragma"];

/// Response under construction.
///
/// A responder sets the status (default `200 OK`), headers, cookies and a
/// body. The engine adds framing, `Date`, `Server`, validators and caching
/// headers, negotiates the content coding and serializes it.
///
/// The body is kept per content coding. The identity representation is what
/// [`body`](Response::body) and friends set; other codings can be supplied
/// directly with [`representation`](Response::representation) or derived on
/// demand with [`compute_from`](Response::compute_from).
///
/// # Examples
/// ```
/// # maker_http::run_test(|_, resp| {
/// use maker_http::{Cookie, Encoding, StatusCode};
///
/// resp.status(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .cookie(Cookie::new("session", "a b").path("/").http_only())
///     .compute_from(Encoding::Gzip, Encoding::Identity)
///     .body("hello")
/// # });
/// ```
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    cookies: BTreeMap<String, Cookie>,

    bodies: [Body; 4],
    compute_from: [Option<Encoding>; 4],

    close: bool,
}

/// Proof that a responder produced a response.
#[doc(hidden)]
#[derive(Debug)]
pub struct Handled(());

/// One representation of the response body.
#[derive(Default)]
pub enum Body {
    #[default]
    Nil,
    Literal(Vec<u8>),
    Stream(BodyStream),
}

/// Stream-backed body. Only a seekable stream has a known length, which
/// byte ranges and `Content-Length` need.
pub enum BodyStream {
    Plain(Box<dyn Read + Send>),
    Seekable(Box<dyn ReadSeek + Send>),
}

/// [`Read`] + [`Seek`], usable as a trait object.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

impl Body {
    #[inline]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Body::Nil)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Nil => f.write_str("Nil"),
            Body::Literal(data) => write!(f, "Literal({} bytes)", data.len()),
            Body::Stream(BodyStream::Plain(_)) => f.write_str("Stream(Plain)"),
            Body::Stream(BodyStream::Seekable(_)) => f.write_str("Stream(Seekable)"),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("bodies", &self.bodies)
            .field("compute_from", &self.compute_from)
            .finish()
    }
}

impl Response {
    #[inline]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        let mut resp = Response {
            status: None,
            headers: HeaderMap::with_capacity(limits.header_capacity.max(PRESEEDED.len())),
            cookies: BTreeMap::new(),

            bodies: Default::default(),
            compute_from: [None; 4],

            close: false,
        };
        resp.seed_headers();
        resp
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.status = None;
        self.headers.clear();
        self.seed_headers();
        self.cookies.clear();

        self.bodies = Default::default();
        self.compute_from = [None; 4];

        self.close = false;
    }

    #[inline]
    fn seed_headers(&mut self) {
        for name in PRESEEDED {
            self.headers.insert(name, "");
        }
    }
}

// Builder API
impl Response {
    /// Sets the status code. Unset means `200 OK`.
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = Some(status);
        self
    }

    /// Sets a header, replacing earlier values of the same name.
    ///
    /// # Examples
    /// ```
    /// # maker_http::run_test(|_, resp| {
    /// resp.header("X-Count", 42u32).header("X-Ok", true).finish()
    /// # });
    /// ```
    pub fn header<N: Into<String>, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        let mut buffer = Vec::new();
        value.write_to(&mut buffer);
        self.headers
            .insert(name, String::from_utf8_lossy(&buffer).into_owned());
        self
    }

    /// Adds a cookie. A later cookie with the same name replaces it.
    #[inline]
    pub fn cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.insert(cookie.name.clone(), cookie);
        self
    }

    /// Closes the connection after this response.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.close = true;
        self
    }

    /// Sets the representation for one content coding, e.g. a precompressed
    /// file for [`Encoding::Gzip`].
    #[inline]
    pub fn representation(&mut self, encoding: Encoding, body: Body) -> &mut Self {
        self.bodies[encoding.index()] = body;
        self
    }

    /// Lets the engine derive the `target` representation from `source` if
    /// the client prefers it. Ignored if `target` already has a body.
    ///
    /// Literal sources are converted in memory, giving a known length. Stream
    /// sources are converted while sending.
    #[inline]
    pub fn compute_from(&mut self, target: Encoding, source: Encoding) -> &mut Self {
        if target != source {
            self.compute_from[target.index()] = Some(source);
        }
        self
    }

    /// Sets the identity body.
    #[inline]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        let mut buffer = Vec::new();
        data.write_to(&mut buffer);
        self.bodies[Encoding::Identity.index()] = Body::Literal(buffer);
        Handled(())
    }

    /// Builds the identity body with a writer.
    ///
    /// # Examples
    /// ```
    /// # maker_http::run_test(|_, resp| {
    /// use std::io::Write;
    ///
    /// resp.body_with(|w| {
    ///     w.write("total: ");
    ///     w.write(6 - 2);
    ///     write!(w, " of {}", 10).unwrap();
    /// })
    /// # });
    /// ```
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        let mut buffer = Vec::new();
        f(&mut BodyWriter(&mut buffer));
        self.bodies[Encoding::Identity.index()] = Body::Literal(buffer);
        Handled(())
    }

    /// Streams the identity body from a reader of unknown length.
    #[inline]
    pub fn stream<R: Read + Send + 'static>(&mut self, reader: R) -> Handled {
        self.bodies[Encoding::Identity.index()] = Body::Stream(BodyStream::Plain(Box::new(reader)));
        Handled(())
    }

    /// Streams the identity body from a seekable reader, e.g. a file. Its
    /// length is known, so it can serve byte ranges.
    #[inline]
    pub fn seekable<R: Read + Seek + Send + 'static>(&mut self, reader: R) -> Handled {
        self.bodies[Encoding::Identity.index()] =
            Body::Stream(BodyStream::Seekable(Box::new(reader)));
        Handled(())
    }

    /// Finishes without a body of its own. Error statuses then get the host's
    /// standard response.
    #[inline]
    pub fn finish(&mut self) -> Handled {
        Handled(())
    }
}

// Engine side
impl Response {
    #[inline]
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[inline]
    pub(crate) fn cookies(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.values()
    }

    #[inline]
    pub(crate) const fn wants_close(&self) -> bool {
        self.close
    }

    /// `true` when there is no identity body and none can be computed.
    #[inline]
    pub fn is_nil(&self) -> bool {
        self.bodies[Encoding::Identity.index()].is_nil()
            && self.compute_from[Encoding::Identity.index()].is_none()
    }

    /// `true` when all representations are absent.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.bodies.iter().all(Body::is_nil)
    }

    #[cfg(test)]
    pub(crate) fn body_of(&self, encoding: Encoding) -> &Body {
        &self.bodies[encoding.index()]
    }

    #[inline]
    pub(crate) fn take_body(&mut self, encoding: Encoding) -> Body {
        std::mem::take(&mut self.bodies[encoding.index()])
    }

    /// Where the `encoding` representation comes from: itself, or the
    /// designated source if it is absent.
    pub(crate) fn source_of(&self, encoding: Encoding) -> Option<Encoding> {
        if !self.bodies[encoding.index()].is_nil() {
            return Some(encoding);
        }

        self.compute_from[encoding.index()]
            .filter(|source| !self.bodies[source.index()].is_nil())
    }

    /// Drops every body, e.g. when the status is replaced by an error.
    #[inline]
    pub(crate) fn clear_bodies(&mut self) {
        self.bodies = Default::default();
        self.compute_from = [None; 4];
    }
}

// COOKIE

/// A `Set-Cookie` entry. Name and value are percent-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<u64>,
    expires: Option<SystemTime>,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    pub fn path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain<D: Into<String>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn expires(mut self, time: SystemTime) -> Self {
        self.expires = Some(time);
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `Set-Cookie` header value.
    pub(crate) fn to_header(&self) -> String {
        let mut out = format!(
            "{}={}",
            urlencoding::encode(&self.name),
            urlencoding::encode(&self.value)
        );

        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&fmt_date(expires));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

pub mod write {
    use std::{borrow::Cow, rc::Rc, sync::Arc};

    /// Writer for [`Response::body_with`](super::Response::body_with).
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written as header values and bodies.
    ///
    /// Implemented for strings, byte slices, integers, `bool` and `char`.
    /// Floats are left out on purpose: their formatting is a choice the
    /// caller should make explicitly.
    ///
    /// # Example
    /// ```
    /// use maker_http::WriteBuffer;
    ///
    /// struct Celsius(i16);
    ///
    /// impl WriteBuffer for Celsius {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.extend_from_slice("°C".as_bytes());
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conv:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let conv = $conv;
                    conv(self, buffer);
                }
            })*
        };
        (display => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    use std::io::Write;
                    let _ = write!(buffer, "{}", self);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }

    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => str, String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        display => u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Cursor,
        time::{Duration, UNIX_EPOCH},
    };

    fn response() -> Response {
        Response::new(&RespLimits::default())
    }

    #[test]
    fn preseeded_headers() {
        let mut resp = response();
        for name in PRESEEDED {
            assert_eq!(resp.headers().get(name), Some(""));
        }

        resp.header("Expires", "0").header("X-Other", 1u8);
        resp.reset();

        assert_eq!(resp.headers().len(), 3);
        assert_eq!(resp.headers().get("expires"), Some(""));

        #[rustfmt::skip]
        let cases = [(0, PRESEEDED.len()), (16, 16), (40, 40)];

        for (header_capacity, expected) in cases {
            let limits = RespLimits { header_capacity, ..RespLimits::default() };
            assert!(Response::new(&limits).headers().capacity() >= expected, "{header_capacity}");
        }
    }

    #[test]
    fn header_values() {
        let mut resp = response();
        resp.header("A", "text")
            .header("B", 42u64)
            .header("C", -7i32)
            .header("D", true)
            .header("E", 'x')
            .header("F", b"raw")
            .header("G", String::from("owned"))
            .header("a", "replaced");

        #[rustfmt::skip]
        let expected = [("A", "replaced"), ("B", "42"), ("C", "-7"), ("D", "true"), ("E", "x"), ("F", "raw"), ("G", "owned")];

        for (name, value) in expected {
            assert_eq!(resp.headers().get(name), Some(value), "{name}");
        }
    }

    #[test]
    fn bodies() {
        let mut resp = response();
        assert!(resp.is_nil());
        assert!(resp.is_empty());

        let _ = resp.body("hello");
        assert!(!resp.is_nil());
        assert!(matches!(resp.body_of(Encoding::Identity), Body::Literal(b) if b == b"hello"));

        let _ = resp.stream(Cursor::new(vec![1, 2, 3]));
        assert!(matches!(
            resp.body_of(Encoding::Identity),
            Body::Stream(BodyStream::Plain(_))
        ));

        let _ = resp.seekable(Cursor::new(vec![1, 2, 3]));
        assert!(matches!(
            resp.take_body(Encoding::Identity),
            Body::Stream(BodyStream::Seekable(_))
        ));
        assert!(resp.is_nil());
    }

    #[test]
    fn computed_representations() {
        let mut resp = response();
        resp.compute_from(Encoding::Gzip, Encoding::Identity);

        assert_eq!(resp.source_of(Encoding::Gzip), None);

        let _ = resp.body("data");
        assert_eq!(resp.source_of(Encoding::Gzip), Some(Encoding::Identity));
        assert_eq!(resp.source_of(Encoding::Identity), Some(Encoding::Identity));
        assert_eq!(resp.source_of(Encoding::Deflate), None);

        resp.representation(Encoding::Gzip, Body::Literal(b"precompressed".to_vec()));
        assert_eq!(resp.source_of(Encoding::Gzip), Some(Encoding::Gzip));

        let mut resp = response();
        resp.representation(Encoding::Bzip2, Body::Literal(vec![0]))
            .compute_from(Encoding::Identity, Encoding::Bzip2)
            .compute_from(Encoding::Bzip2, Encoding::Bzip2);

        assert!(!resp.is_nil());
        assert_eq!(resp.source_of(Encoding::Identity), Some(Encoding::Bzip2));

        resp.clear_bodies();
        assert!(resp.is_nil());
        assert!(resp.is_empty());
    }

    #[test]
    fn body_with() {
        let mut resp = response();
        let _ = resp.body_with(|w| {
            use std::io::Write;
            w.write("a");
            w.write(1u8);
            write!(w, "-{}", 2).unwrap();
        });

        assert!(matches!(resp.body_of(Encoding::Identity), Body::Literal(b) if b == b"a1-2"));
    }

    #[test]
    fn cookies() {
        let mut resp = response();
        resp.cookie(Cookie::new("id", "1"))
            .cookie(Cookie::new("a b", "x;y").path("/").secure())
            .cookie(
                Cookie::new("id", "2")
                    .domain("example.com")
                    .max_age(60)
                    .expires(UNIX_EPOCH + Duration::from_secs(784_111_777))
                    .http_only(),
            );

        let headers: Vec<String> = resp.cookies().map(Cookie::to_header).collect();
        assert_eq!(
            headers,
            [
                "a%20b=x%3By; Path=/; Secure",
                "id=2; Domain=example.com; Max-Age=60; \
                 Expires=Sun, 06 Nov 1994 08:49:37 GMT; HttpOnly",
            ]
        );
    }
}
