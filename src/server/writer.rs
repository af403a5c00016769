//! Response serialization: negotiation, ranges, framing

use crate::{
    filter::{ChunkedWriter, DecodeReader, EncodeWriter, OutputChain},
    http::{
        encoding::{negotiate, Encoding},
        range::{RangeList, Span},
        request::Request,
        response::{Body, BodyStream, ReadSeek, Response},
        types::{Method, StatusCode, Version},
        validators::fmt_date,
    },
    limits::RespLimits,
    server::responder::Host,
};
use rand::{distributions::Alphanumeric, Rng};
use std::{
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    time::SystemTime,
};

/// Upper bound for a representation decoded in memory by `compute_from`.
const MAX_COMPUTED: u64 = 1 << 30;

const BOUNDARY_LEN: usize = 24;

/// The bytes of the selected representation.
enum Source {
    Bytes(Vec<u8>),
    Seekable {
        reader: Box<dyn ReadSeek + Send>,
        base: u64,
    },
    Stream(Box<dyn Read>),
}

/// Body as it goes on the wire.
struct Entity {
    source: Source,
    length: Option<u64>,
    /// Coding applied while sending, for streams computed from another coding.
    encode: Option<Encoding>,
    ranges: Option<Ranges>,
}

struct Ranges {
    spans: Vec<Span>,
    total: u64,
    /// Boundary and part `Content-Type` when more than one span is sent.
    multipart: Option<(String, Option<String>)>,
}

impl Entity {
    fn new(source: Source, length: Option<u64>) -> Self {
        Entity {
            source,
            length,
            encode: None,
            ranges: None,
        }
    }
}

/// Serializes `resp` as the answer to `req`.
///
/// Fills in the status default, the host's standard response for bodiless
/// errors, content coding, byte ranges, `Date`, `Server`, framing and
/// cookies. Returns whether the connection stays open afterwards.
pub(crate) fn send_response<W: Write>(
    stream: &mut W,
    req: &Request,
    resp: &mut Response,
    host: &dyn Host,
    persistent: bool,
    limits: &RespLimits,
) -> io::Result<bool> {
    let method = req.method();
    let version = req.version();
    let mut status = resp.status_code().unwrap_or(StatusCode::Ok);

    if resp.is_empty() && status.allows_body() {
        standard_response(resp, host, status);
    }

    let mut encoding = Encoding::Identity;
    let mut entity = None;

    if !resp.is_empty() && status.allows_body() {
        match negotiate(req.header("accept-encoding"), |e| resp.source_of(e).is_some()) {
            Some(selected) => {
                if alternatives(resp) > 1 {
                    resp.headers_mut().insert("Vary", "Accept-Encoding");
                }
                encoding = selected;
                entity = select(resp, selected)?;
            }
            None => {
                status = StatusCode::NotAcceptable;
                substitute(resp, host, status);
                entity = select(resp, Encoding::Identity)?;
            }
        }
    }

    // A Range header that does not parse is ignored, not rejected.
    let range = req.header("range").and_then(RangeList::parse);
    if let (Some(list), true) = (range, method == Method::Get && status.is_success()) {
        let total = entity.as_ref().and_then(|body| body.length);

        match total.and_then(|total| list.resolve(total).map(|spans| (total, spans))) {
            Some((total, spans)) => {
                if let Some(body) = entity.as_mut() {
                    status = StatusCode::PartialContent;
                    apply_ranges(resp, body, total, spans);
                }
            }
            None if entity.is_some() => {
                status = StatusCode::RangeNotSatisfiable;
                let total = total.map_or("*".to_string(), |len| len.to_string());

                substitute(resp, host, status);
                resp.headers_mut()
                    .insert("Content-Range", format!("bytes */{total}"));
                encoding = Encoding::Identity;
                entity = select(resp, Encoding::Identity)?;
            }
            None => {}
        }
    }

    if matches!(method, Method::Get | Method::Head) && status.is_success() {
        let known = entity.as_ref().map_or(true, |e| e.length.is_some());
        resp.headers_mut()
            .insert("Accept-Ranges", if known { "bytes" } else { "none" });
    }

    let headers = resp.headers_mut();
    headers.remove("Content-Length");
    headers.remove("Transfer-Encoding");
    headers.remove("Content-Encoding");

    let mut chunked = false;
    let mut persistent = persistent && !status.is_error() && !resp.wants_close();

    match (&entity, status.allows_body()) {
        (_, false) => {}
        (None, true) => resp.headers_mut().insert("Content-Length", "0"),
        (Some(body), true) => {
            if encoding != Encoding::Identity {
                resp.headers_mut().insert("Content-Encoding", encoding.as_str());
            }

            match (body.length, version) {
                (Some(length), _) => resp.headers_mut().insert("Content-Length", length.to_string()),
                (None, Version::Http11) => {
                    chunked = true;
                    resp.headers_mut().insert("Transfer-Encoding", "chunked");
                }
                (None, Version::Http10) => persistent = false,
            }
        }
    }

    let headers = resp.headers_mut();
    headers.insert("Date", fmt_date(SystemTime::now()));
    match host.name() {
        "" => {}
        name => headers.insert("Server", name),
    }
    match persistent {
        true => {
            headers.remove("Connection");
        }
        false => headers.insert("Connection", "close"),
    }

    let mut out = BufWriter::with_capacity(limits.stream_chunk_size.max(512), stream);
    let mut head = Vec::with_capacity(limits.default_capacity);

    head.extend_from_slice(status.status_line(version));
    for (name, value) in resp.headers().iter().filter(|(_, v)| !v.is_empty()) {
        write_header(&mut head, name, value);
    }
    for cookie in resp.cookies() {
        write_header(&mut head, "Set-Cookie", &cookie.to_header());
    }
    head.extend_from_slice(b"\r\n");
    out.write_all(&head)?;

    if let (Some(body), true, false) = (entity, status.allows_body(), method == Method::Head) {
        write_entity(&mut out, body, chunked)?;
    }
    out.flush()?;

    tracing::trace!(status = status.as_u16(), %encoding, chunked, persistent, "response sent");
    Ok(persistent)
}

#[inline]
fn write_header(head: &mut Vec<u8>, name: &str, value: &str) {
    head.extend_from_slice(name.as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value.as_bytes());
    head.extend_from_slice(b"\r\n");
}

fn alternatives(resp: &Response) -> usize {
    Encoding::ALL
        .into_iter()
        .filter(|&e| resp.source_of(e).is_some())
        .count()
}

/// Sets the host's page for `status` as the body, if it has one.
fn standard_response(resp: &mut Response, host: &dyn Host, status: StatusCode) {
    if let Some(page) = host.standard_response(status) {
        resp.headers_mut().insert("Content-Type", page.content_type);
        resp.representation(Encoding::Identity, Body::Literal(page.body));
    }
}

/// Throws the prepared body away and answers with `status` instead.
fn substitute(resp: &mut Response, host: &dyn Host, status: StatusCode) {
    resp.clear_bodies();
    resp.headers_mut().remove("Content-Type");
    resp.status(status);
    standard_response(resp, host, status);
}

/// Produces the `encoding` representation, computing it if needed.
fn select(resp: &mut Response, encoding: Encoding) -> io::Result<Option<Entity>> {
    let Some(source) = resp.source_of(encoding) else {
        return Ok(None);
    };

    let entity = match (resp.take_body(source), source == encoding) {
        (Body::Nil, _) => return Ok(None),

        (Body::Literal(data), true) => {
            let length = data.len() as u64;
            Entity::new(Source::Bytes(data), Some(length))
        }
        (Body::Literal(data), false) => {
            let identity = match source {
                Encoding::Identity => data,
                _ => crate::filter::decode_all(source, &data, MAX_COMPUTED)?,
            };
            let data = match encoding {
                Encoding::Identity => identity,
                _ => crate::filter::encode_all(encoding, &identity)?,
            };
            let length = data.len() as u64;
            Entity::new(Source::Bytes(data), Some(length))
        }

        (Body::Stream(BodyStream::Seekable(mut reader)), true) => {
            let base = reader.stream_position()?;
            let end = reader.seek(SeekFrom::End(0))?;
            reader.seek(SeekFrom::Start(base))?;

            Entity::new(Source::Seekable { reader, base }, Some(end.saturating_sub(base)))
        }
        (Body::Stream(BodyStream::Plain(reader)), true) => Entity::new(Source::Stream(reader), None),

        (Body::Stream(stream), false) => {
            let reader: Box<dyn Read> = match stream {
                BodyStream::Plain(reader) => Box::new(reader),
                BodyStream::Seekable(reader) => Box::new(reader),
            };
            let decoded: Box<dyn Read> = match source {
                Encoding::Identity => reader,
                _ => Box::new(DecodeReader::new(source, BufReader::new(reader))),
            };

            let mut entity = Entity::new(Source::Stream(decoded), None);
            entity.encode = (encoding != Encoding::Identity).then_some(encoding);
            entity
        }
    };

    Ok(Some(entity))
}

/// Narrows `body` to `spans`: one span is sent as is, several as
/// `multipart/byteranges`.
fn apply_ranges(resp: &mut Response, body: &mut Entity, total: u64, spans: Vec<Span>) {
    if let [span] = spans[..] {
        resp.headers_mut()
            .insert("Content-Range", span.content_range(total));
        body.length = Some(span.len());
        body.ranges = Some(Ranges {
            spans,
            total,
            multipart: None,
        });
        return;
    }

    let boundary: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect();
    let content_type = resp.headers().get_non_empty("content-type").map(str::to_string);

    let parts: u64 = spans
        .iter()
        .map(|&span| {
            let head = part_head(&boundary, content_type.as_deref(), span, total);
            head.len() as u64 + span.len()
        })
        .sum();

    resp.headers_mut().insert(
        "Content-Type",
        format!("multipart/byteranges; boundary={boundary}"),
    );
    body.length = Some(parts + closing(&boundary).len() as u64);
    body.ranges = Some(Ranges {
        spans,
        total,
        multipart: Some((boundary, content_type)),
    });
}

fn part_head(boundary: &str, content_type: Option<&str>, span: Span, total: u64) -> String {
    let mut head = format!("\r\n--{boundary}\r\n");
    if let Some(content_type) = content_type {
        head.push_str("Content-Type: ");
        head.push_str(content_type);
        head.push_str("\r\n");
    }
    head.push_str("Content-Range: ");
    head.push_str(&span.content_range(total));
    head.push_str("\r\n\r\n");
    head
}

fn closing(boundary: &str) -> String {
    format!("\r\n--{boundary}--\r\n")
}

fn write_entity<W: Write>(out: &mut W, body: Entity, chunked: bool) -> io::Result<()> {
    let Entity {
        mut source,
        length,
        encode,
        ranges,
    } = body;

    if let Some(ranges) = ranges {
        return write_ranges(out, &mut source, &ranges);
    }

    let mut chain = OutputChain::new(out);
    if chunked {
        chain = chain.push("chunked", ChunkedWriter::new);
    }
    if let Some(encoding) = encode {
        chain = chain.push(encoding.as_str(), |inner| EncodeWriter::new(encoding, inner));
    }

    match source {
        Source::Bytes(data) => chain.write_all(&data)?,
        Source::Seekable { reader, .. } => {
            io::copy(&mut reader.take(length.unwrap_or(u64::MAX)), &mut chain)?;
        }
        Source::Stream(mut reader) => {
            io::copy(&mut reader, &mut chain)?;
        }
    }
    chain.close()
}

fn write_ranges<W: Write>(out: &mut W, source: &mut Source, ranges: &Ranges) -> io::Result<()> {
    let Some((boundary, content_type)) = &ranges.multipart else {
        return ranges
            .spans
            .iter()
            .try_for_each(|&span| copy_span(out, source, span));
    };

    for &span in &ranges.spans {
        let head = part_head(boundary, content_type.as_deref(), span, ranges.total);
        out.write_all(head.as_bytes())?;
        copy_span(out, source, span)?;
    }
    out.write_all(closing(boundary).as_bytes())
}

fn copy_span<W: Write>(out: &mut W, source: &mut Source, span: Span) -> io::Result<()> {
    match source {
        Source::Bytes(data) => out.write_all(&data[span.start as usize..=span.end as usize]),
        Source::Seekable { reader, base } => {
            reader.seek(SeekFrom::Start(*base + span.start))?;

            let copied = io::copy(&mut reader.by_ref().take(span.len()), out)?;
            match copied < span.len() {
                true => Err(io::ErrorKind::UnexpectedEof.into()),
                false => Ok(()),
            }
        }
        // Ranges are only resolved against a known length.
        Source::Stream(_) => Err(io::ErrorKind::Unsupported.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::ChunkedFilter,
        http::response::Cookie,
        limits::ReqLimits,
        server::responder::DefaultHost,
    };
    use flate2::read::GzDecoder;
    use std::io::Cursor;

    struct Sent {
        head: String,
        body: Vec<u8>,
        persistent: bool,
    }

    impl Sent {
        fn has(&self, line: &str) -> bool {
            self.head.split("\r\n").any(|l| l == line)
        }
    }

    fn send<F: FnOnce(&mut Response)>(head: &str, f: F) -> Sent {
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        req.read_head(&mut head.as_bytes(), &limits).unwrap();

        let mut resp = Response::new(&RespLimits::default());
        f(&mut resp);

        let mut out = Vec::new();
        let host = DefaultHost::new("test");
        let persistent = req.version() == Version::Http11;
        let persistent =
            send_response(&mut out, &req, &mut resp, &host, persistent, &RespLimits::default()).unwrap();

        let split = memchr::memmem::find(&out, b"\r\n\r\n").unwrap();
        Sent {
            head: String::from_utf8(out[..split].to_vec()).unwrap(),
            body: out[split + 4..].to_vec(),
            persistent,
        }
    }

    const GET: &str = "GET / HTTP/1.1\r\nHost: x\r\n\r\n";

    #[test]
    fn literal_body() {
        let sent = send(GET, |resp| {
            let _ = resp.header("Content-Type", "text/plain").body("hello");
        });

        assert!(sent.head.starts_with("HTTP/1.1 200 OK\r\n"));
        for line in ["Content-Length: 5", "Content-Type: text/plain", "Server: test", "Accept-Ranges: bytes"] {
            assert!(sent.has(line), "{line} in {}", sent.head);
        }
        assert!(sent.head.contains("\r\nDate: "));
        assert!(!sent.head.contains("Expires"));
        assert!(!sent.head.contains("Connection"));
        assert_eq!(sent.body, b"hello");
        assert!(sent.persistent);
    }

    #[test]
    fn framing() {
        let stream = || Cursor::new(b"hello".to_vec());

        let sent = send(GET, |resp| {
            let _ = resp.stream(stream());
        });
        assert!(sent.has("Transfer-Encoding: chunked"));
        assert!(sent.has("Accept-Ranges: none"));
        assert_eq!(sent.body, b"5\r\nhello\r\n0\r\n\r\n");
        assert!(sent.persistent);

        let sent = send("GET / HTTP/1.0\r\n\r\n", |resp| {
            let _ = resp.stream(stream());
        });
        assert!(sent.head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(!sent.head.contains("Transfer-Encoding"));
        assert!(!sent.head.contains("Content-Length"));
        assert!(sent.has("Connection: close"));
        assert_eq!(sent.body, b"hello");
        assert!(!sent.persistent);

        let sent = send(GET, |resp| {
            let _ = resp.seekable(stream());
        });
        assert!(sent.has("Content-Length: 5"));
        assert_eq!(sent.body, b"hello");

        let sent = send("HEAD / HTTP/1.1\r\nHost: x\r\n\r\n", |resp| {
            let _ = resp.body("hello");
        });
        assert!(sent.has("Content-Length: 5"));
        assert!(sent.body.is_empty());

        let sent = send(GET, |resp| {
            let _ = resp.status(StatusCode::NoContent).finish();
        });
        assert!(sent.head.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!sent.head.contains("Content-Length"));

        let sent = send(GET, |resp| {
            let _ = resp.header("Content-Length", 99u8).close().finish();
        });
        assert!(sent.has("Content-Length: 0"));
        assert!(sent.has("Connection: close"));
        assert!(!sent.persistent);
    }

    #[test]
    fn standard_responses() {
        let sent = send(GET, |resp| {
            let _ = resp.status(StatusCode::NotFound).finish();
        });

        assert!(sent.head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(sent.has("Content-Type: text/html; charset=utf-8"));
        assert!(sent.has("Connection: close"));
        assert!(String::from_utf8(sent.body).unwrap().contains("404 Not Found"));
        assert!(!sent.persistent);
    }

    #[test]
    fn cookies() {
        let sent = send(GET, |resp| {
            resp.cookie(Cookie::new("b", "2")).cookie(Cookie::new("a", "1").path("/"));
            let _ = resp.finish();
        });

        assert!(sent.head.contains("Set-Cookie: a=1; Path=/\r\nSet-Cookie: b=2"));
    }

    #[test]
    fn negotiation() {
        let gzip = "GET / HTTP/1.1\r\nHost: x\r\nAccept-Encoding: gzip\r\n\r\n";

        let sent = send(gzip, |resp| {
            let _ = resp.compute_from(Encoding::Gzip, Encoding::Identity).body("hello hello");
        });
        assert!(sent.has("Content-Encoding: gzip"));
        assert!(sent.has("Vary: Accept-Encoding"));
        assert!(sent.has(&format!("Content-Length: {}", sent.body.len())));

        let mut plain = String::new();
        GzDecoder::new(&sent.body[..]).read_to_string(&mut plain).unwrap();
        assert_eq!(plain, "hello hello");

        // Streams are compressed on the fly and chunked.
        let sent = send(gzip, |resp| {
            let _ = resp
                .compute_from(Encoding::Gzip, Encoding::Identity)
                .stream(Cursor::new(b"streamed".to_vec()));
        });
        assert!(sent.has("Content-Encoding: gzip"));
        assert!(sent.has("Transfer-Encoding: chunked"));

        let mut plain = String::new();
        GzDecoder::new(ChunkedFilter::new(&sent.body[..]))
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain, "streamed");

        // Without the header identity is preferred.
        let sent = send(GET, |resp| {
            let _ = resp.compute_from(Encoding::Gzip, Encoding::Identity).body("hello");
        });
        assert!(!sent.head.contains("Content-Encoding"));
        assert_eq!(sent.body, b"hello");

        let refused = "GET / HTTP/1.1\r\nHost: x\r\nAccept-Encoding: gzip, identity;q=0\r\n\r\n";
        let sent = send(refused, |resp| {
            let _ = resp.body("hello");
        });
        assert!(sent.head.starts_with("HTTP/1.1 406 Not Acceptable\r\n"));
        assert!(sent.has("Content-Type: text/html; charset=utf-8"));
    }

    fn ranged(range: &str) -> Sent {
        let head = format!("GET / HTTP/1.1\r\nHost: x\r\nRange: {range}\r\n\r\n");
        send(&head, |resp| {
            let _ = resp.header("Content-Type", "text/plain").body(vec![b'x'; 100]);
        })
    }

    #[test]
    fn single_range() {
        let sent = ranged("bytes=0-49");
        assert!(sent.head.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(sent.has("Content-Range: bytes 0-49/100"));
        assert!(sent.has("Content-Length: 50"));
        assert_eq!(sent.body.len(), 50);

        let sent = send("GET / HTTP/1.1\r\nHost: x\r\nRange: bytes=-3\r\n\r\n", |resp| {
            let _ = resp.seekable(Cursor::new(b"0123456789".to_vec()));
        });
        assert!(sent.has("Content-Range: bytes 7-9/10"));
        assert_eq!(sent.body, b"789");
    }

    #[test]
    fn unsatisfiable_range() {
        let sent = ranged("bytes=200-300");
        assert!(sent.head.starts_with("HTTP/1.1 416 Range Not Satisfiable\r\n"));
        assert!(sent.has("Content-Range: bytes */100"));
        assert!(!sent.persistent);

        let sent = send("GET / HTTP/1.1\r\nHost: x\r\nRange: bytes=0-1\r\n\r\n", |resp| {
            let _ = resp.stream(Cursor::new(b"unknown length".to_vec()));
        });
        assert!(sent.has("Content-Range: bytes */*"));
    }

    #[test]
    fn malformed_range_is_ignored() {
        // Lenient on purpose: an unusable Range header serves the full body.
        for range in ["bytes=abc", "bytes=50-10", "lines=0-1", "bytes=0-10,5-20"] {
            let sent = ranged(range);

            assert!(sent.head.starts_with("HTTP/1.1 200 OK\r\n"), "{range}");
            assert_eq!(sent.body.len(), 100, "{range}");
        }

        let sent = send("POST / HTTP/1.1\r\nHost: x\r\nRange: bytes=0-1\r\n\r\n", |resp| {
            let _ = resp.body("full");
        });
        assert_eq!(sent.body, b"full");
    }

    #[test]
    fn multiple_ranges() {
        let head = "GET / HTTP/1.1\r\nHost: x\r\nRange: bytes=0-1,5-6\r\n\r\n";
        let sent = send(head, |resp| {
            let _ = resp.header("Content-Type", "text/plain").body("0123456789");
        });

        assert!(sent.head.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(sent.has(&format!("Content-Length: {}", sent.body.len())));

        let content_type = sent
            .head
            .split("\r\n")
            .find_map(|l| l.strip_prefix("Content-Type: multipart/byteranges; boundary="))
            .unwrap();
        assert_eq!(content_type.len(), BOUNDARY_LEN);

        let expected = format!(
            "\r\n--{b}\r\nContent-Type: text/plain\r\nContent-Range: bytes 0-1/10\r\n\r\n01\
             \r\n--{b}\r\nContent-Type: text/plain\r\nContent-Range: bytes 5-6/10\r\n\r\n56\
             \r\n--{b}--\r\n",
            b = content_type
        );
        assert_eq!(String::from_utf8(sent.body).unwrap(), expected);
    }
}
