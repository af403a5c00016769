//! Request entity: framing, content codings and keyword extraction
//!
//! ```text
//!   socket -> [ length | chunked ] -> [ transfer codings ]* -> [ content codings ]* -> extractor
//! ```

use crate::{
    errors::EntityError,
    filter::{filter_error, BoundaryFilter, ChunkedFilter, DecodeReader, InputChain, LengthFilter},
    http::{
        encoding::Encoding,
        query::{Decoded, Query},
        request::{Keyword, Request},
        types::{list_items, parse_decimal, HeaderMap, Version},
    },
    limits::ReqLimits,
};
use std::io::{self, BufRead, BufReader, Read, Write};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// How an entity is delimited and coded, read from the request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Framing {
    /// Content codings, in the order the client applied them.
    content: Vec<Encoding>,
    /// Transfer codings below `chunked`, in the order applied.
    transfer: Vec<Encoding>,
    length: Length,
    expects_continue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    Chunked,
    Fixed(u64),
}

impl Framing {
    /// `true` when the request announces an entity at all.
    #[inline]
    pub(crate) fn announced(headers: &HeaderMap) -> bool {
        headers.contains("transfer-encoding") || headers.contains("content-length")
    }

    /// Validates the entity headers.
    ///
    /// Checks run in a fixed order, so a request with several problems always
    /// gets the same answer: content coding, transfer coding, length, size,
    /// then expectation.
    pub(crate) fn from_headers(headers: &HeaderMap, limits: &ReqLimits) -> Result<Self, EntityError> {
        let mut content = Vec::new();
        for token in headers.get("content-encoding").into_iter().flat_map(list_items) {
            match Encoding::from_token(token) {
                Some(Encoding::Identity) => {}
                Some(encoding) => content.push(encoding),
                None => return Err(EntityError::UnsupportedContentCoding),
            }
        }

        let mut transfer = Vec::new();
        let mut chunked = false;
        for token in headers.get("transfer-encoding").into_iter().flat_map(list_items) {
            if chunked {
                // Nothing may follow `chunked`, not even a second one.
                return Err(EntityError::InvalidFraming);
            }

            match token.eq_ignore_ascii_case("chunked") {
                true => chunked = true,
                false => match Encoding::from_token(token) {
                    Some(Encoding::Identity) => {}
                    Some(encoding) => transfer.push(encoding),
                    None => return Err(EntityError::UnsupportedTransferCoding),
                },
            }
        }
        if !transfer.is_empty() && !chunked {
            return Err(EntityError::InvalidFraming);
        }

        let length = match chunked {
            true => Length::Chunked,
            false => {
                let value = headers
                    .get("content-length")
                    .ok_or(EntityError::LengthRequired)?;
                let length = content_length(value).ok_or(EntityError::InvalidLength)?;

                if length > limits.body_size as u64 {
                    return Err(EntityError::TooLarge);
                }
                Length::Fixed(length)
            }
        };

        let expects_continue = match headers.get("expect") {
            None => false,
            Some(value) if value.trim().eq_ignore_ascii_case("100-continue") => true,
            Some(_) => return Err(EntityError::ExpectationFailed),
        };

        Ok(Framing {
            content,
            transfer,
            length,
            expects_continue,
        })
    }

    /// Stacks the framing and every coding on top of `io`.
    fn chain<'a, R: BufRead + 'a>(&self, io: R, decode: bool) -> InputChain<'a> {
        let mut chain = match self.length {
            Length::Fixed(length) => {
                InputChain::new(io).push("length", |inner| LengthFilter::new(inner, length))
            }
            Length::Chunked => InputChain::new(io).push("chunked", ChunkedFilter::new),
        };
        if !decode {
            return chain;
        }

        // Codings are removed in the reverse order of application.
        for &encoding in self.transfer.iter().rev().chain(self.content.iter().rev()) {
            chain = chain.push(encoding.as_str(), |inner| DecodeReader::buffered(encoding, inner));
        }
        chain
    }
}

/// Identical repeated values (`5, 5`) are tolerated, anything else is not.
fn content_length(value: &str) -> Option<u64> {
    let mut length = None;

    for item in value.split(',').map(str::trim) {
        let parsed = parse_decimal(item.as_bytes())?;
        if length.is_some_and(|length| length != parsed) {
            return None;
        }
        length = Some(parsed);
    }
    length
}

fn malformed(err: io::Error) -> EntityError {
    tracing::debug!(error = %err, filter = ?filter_error(&err), "entity decoding failed");
    EntityError::Malformed
}

/// Reads and decodes the request entity, leaving keywords and the raw body on
/// `req`.
///
/// `100 Continue` is sent before the first body byte is read, if the client
/// asked for it. `keywords`, when given, restricts which keywords are kept.
pub(crate) fn read_entity<S: Read + Write>(
    io: &mut BufReader<S>,
    req: &mut Request,
    keywords: Option<&[String]>,
    limits: &ReqLimits,
) -> Result<(), EntityError> {
    let framing = Framing::from_headers(req.headers(), limits)?;

    if framing.expects_continue && req.version() == Version::Http11 {
        send_continue(io.get_mut()).map_err(malformed)?;
    }

    let limit = limits.body_size as u64;
    let mut source = framing.chain(&mut *io, true).take(limit + 1);

    let extracted = match media_type(req.headers()).as_deref() {
        Some("application/x-www-form-urlencoded") => {
            let mut data = Vec::new();
            source.read_to_end(&mut data).map_err(malformed)?;

            match Query::parse::<Decoded>(&data, data.len() + 1) {
                Ok(decoded) => decoded
                    .into_pairs()
                    .map(|(name, value)| Keyword::text(name, value))
                    .collect(),
                Err(_) => Vec::new(),
            }
        }
        Some("multipart/form-data") => {
            let boundary = req
                .header("content-type")
                .and_then(boundary_param)
                .ok_or(EntityError::Malformed)?;
            read_multipart(&mut source, &boundary)?
        }
        _ => {
            let body = req.body_mut();
            source.read_to_end(body).map_err(malformed)?;
            Vec::new()
        }
    };

    if source.limit() == 0 {
        return Err(EntityError::TooLarge);
    }

    let extracted = match keywords {
        Some(allowed) => extracted
            .into_iter()
            .filter(|k| allowed.iter().any(|name| *name == k.name))
            .collect(),
        None => extracted,
    };
    req.set_keywords(extracted);

    Ok(())
}

/// Reads the entity framing without keeping anything.
///
/// With `interim`, a client waiting for `100 Continue` gets it first.
/// Without, such an entity cannot be skipped and the connection must close.
pub(crate) fn discard_entity<S: Read + Write>(
    io: &mut BufReader<S>,
    req: &Request,
    limits: &ReqLimits,
    interim: bool,
) -> Result<(), EntityError> {
    if !Framing::announced(req.headers()) {
        return Ok(());
    }

    let framing = Framing::from_headers(req.headers(), limits)?;
    if framing.expects_continue && req.version() == Version::Http11 {
        if !interim {
            return Err(EntityError::ExpectationFailed);
        }
        send_continue(io.get_mut()).map_err(malformed)?;
    }

    io::copy(&mut framing.chain(&mut *io, false), &mut io::sink()).map_err(malformed)?;
    Ok(())
}

fn send_continue<W: Write>(stream: &mut W) -> io::Result<()> {
    stream.write_all(CONTINUE)?;
    stream.flush()
}

/// Lowercased `type/subtype` of the request's `Content-Type`.
fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get_non_empty("content-type")?;
    let media = value.split(';').next().unwrap_or(value);
    Some(media.trim().to_ascii_lowercase())
}

/// Looks up `name` among the `;`-separated parameters of a header value.
fn param(value: &str, name: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|item| {
        let (key, val) = item.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(name) {
            return None;
        }

        let val = val.trim();
        let val = val
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(val);
        Some(val.to_string())
    })
}

fn boundary_param(content_type: &str) -> Option<String> {
    param(content_type, "boundary").filter(|b| !b.is_empty() && b.len() <= 70)
}

// MULTIPART

/// Splits a `multipart/form-data` body into keywords.
///
/// The first delimiter has no leading CRLF, the rest do, so the preamble is
/// skipped with its own filter before the parts are walked.
fn read_multipart<R: BufRead>(source: R, boundary: &str) -> Result<Vec<Keyword>, EntityError> {
    let mut preamble = BoundaryFilter::new(source, format!("--{boundary}").as_bytes());
    io::copy(&mut preamble, &mut io::sink()).map_err(malformed)?;

    if !preamble.found() {
        return Err(EntityError::Malformed);
    }
    if preamble.is_final() {
        return Ok(Vec::new());
    }

    let mut parts = BoundaryFilter::new(preamble.into_inner(), format!("\r\n--{boundary}").as_bytes());
    let mut keywords = Vec::new();
    let mut part = Vec::new();

    loop {
        part.clear();
        parts.read_to_end(&mut part).map_err(malformed)?;
        if !parts.found() {
            return Err(EntityError::Malformed);
        }

        if let Some(keyword) = parse_part(&part)? {
            keywords.push(keyword);
        }

        if !parts.next_segment() {
            break;
        }
    }

    Ok(keywords)
}

/// One part: header lines, a blank line, then the value. Parts without a
/// `name` are dropped.
fn parse_part(part: &[u8]) -> Result<Option<Keyword>, EntityError> {
    let (head, value) = match part.starts_with(b"\r\n") {
        true => (&b""[..], &part[2..]),
        false => {
            let end = memchr::memmem::find(part, b"\r\n\r\n").ok_or(EntityError::Malformed)?;
            (&part[..end], &part[end + 4..])
        }
    };
    let head = simdutf8::basic::from_utf8(head).map_err(|_| EntityError::Malformed)?;

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in head.split("\r\n").filter(|line| !line.is_empty()) {
        let (field, val) = line.split_once(':').ok_or(EntityError::Malformed)?;
        let val = val.trim();

        if field.trim().eq_ignore_ascii_case("content-disposition") {
            name = param(val, "name");
            filename = param(val, "filename");
        } else if field.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(val.to_string());
        }
    }

    Ok(name.map(|name| Keyword {
        name,
        value: value.to_vec(),
        filename,
        content_type,
    }))
}
