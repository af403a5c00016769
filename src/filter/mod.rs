//! Streaming transforms applied to entity bodies
//!
//! Every filter is a plain [`std::io`] adapter, so they compose by wrapping:
//! the input side is built on [`BufRead`] and the output side on [`Write`].
//!
//! # Input direction
//! ```text
//!   socket  ->  [ LengthFilter | ChunkedFilter ]  ->  [ DecodeReader ]*  ->  caller
//!               |------- framing -------------|      |-- content coding --|
//! ```
//!
//! # Output direction
//! ```text
//!   caller  ->  [ EncodeWriter ]  ->  [ ChunkedWriter ]  ->  Sink  ->  socket
//! ```
//!
//! Both directions are assembled as an [`InputChain`] / [`OutputChain`]: an ordered
//! list of boxed layers, each delegating to the one below it.
//!
//! # Errors
//!
//! A clean end of the entity is always `Ok(0)`. Malformed framing is reported as
//! [`io::ErrorKind::InvalidData`] wrapping a [`FilterError`], and a source that ends
//! before the framing says it should is [`io::ErrorKind::UnexpectedEof`].

use std::io::{self, BufRead, Read, Write};

mod boundary;
mod chunked;
mod codec;
mod length;

pub use self::{
    boundary::BoundaryFilter,
    chunked::{ChunkedFilter, ChunkedWriter},
    codec::{DecodeReader, EncodeWriter},
    length::LengthFilter,
};
pub(crate) use self::codec::{decode_all, encode_all};

/// Framing errors detected while decoding an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// The chunk-size line is missing, is not hexadecimal or overflows.
    #[error("invalid chunk size line")]
    ChunkSize,
    /// A chunk-size line or trailer field is not terminated by CRLF.
    #[error("chunk line is not terminated by CRLF")]
    ChunkLineEnding,
    /// The chunk payload is not followed by CRLF.
    #[error("chunk data is not followed by CRLF")]
    ChunkTerminator,
    /// A chunk-size line or trailer field exceeds the parser's line limit.
    #[error("chunk line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl From<FilterError> for io::Error {
    fn from(err: FilterError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Returns the [`FilterError`] carried by an I/O error, if any.
pub fn filter_error(err: &io::Error) -> Option<FilterError> {
    err.get_ref()?.downcast_ref::<FilterError>().copied()
}

// INPUT

/// An ordered stack of read layers built once per request.
///
/// The first layer wraps the raw source; every [`push`](InputChain::push) wraps the
/// current top. Reads go to the top layer and delegate downward.
pub struct InputChain<'a> {
    top: Box<dyn BufRead + 'a>,
    layers: Vec<&'static str>,
}

impl<'a> InputChain<'a> {
    pub fn new<R: BufRead + 'a>(source: R) -> Self {
        Self {
            top: Box::new(source),
            layers: Vec::with_capacity(4),
        }
    }

    /// Wraps the current top layer with `wrap`.
    pub fn push<L, F>(mut self, name: &'static str, wrap: F) -> Self
    where
        L: BufRead + 'a,
        F: FnOnce(Box<dyn BufRead + 'a>) -> L,
    {
        self.top = Box::new(wrap(self.top));
        self.layers.push(name);
        self
    }

    /// Names of the pushed layers, innermost first.
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }
}

impl Read for InputChain<'_> {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.top.read(buf)
    }
}

impl BufRead for InputChain<'_> {
    #[inline]
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.top.fill_buf()
    }

    #[inline]
    fn consume(&mut self, amt: usize) {
        self.top.consume(amt)
    }
}

// OUTPUT

/// A write layer that owes trailing bytes when the entity ends.
///
/// `close` must flush whatever framing the layer still holds and then close the
/// layer below it.
pub trait OutputFilter: Write {
    fn close(self: Box<Self>) -> io::Result<()>;
}

impl<T: OutputFilter + ?Sized> OutputFilter for Box<T> {
    #[inline]
    fn close(self: Box<Self>) -> io::Result<()> {
        T::close(*self)
    }
}

/// Bottom of every output chain: forwards to the connection writer.
pub struct Sink<'a, W: Write + ?Sized>(pub &'a mut W);

impl<W: Write + ?Sized> Write for Sink<'_, W> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + ?Sized> OutputFilter for Sink<'_, W> {
    #[inline]
    fn close(self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

/// An ordered stack of write layers, mirror of [`InputChain`].
pub struct OutputChain<'a> {
    top: Box<dyn OutputFilter + 'a>,
    layers: Vec<&'static str>,
}

impl<'a> OutputChain<'a> {
    pub fn new<W: Write + ?Sized>(sink: &'a mut W) -> Self {
        Self {
            top: Box::new(Sink(sink)),
            layers: Vec::with_capacity(2),
        }
    }

    pub fn push<L, F>(mut self, name: &'static str, wrap: F) -> Self
    where
        L: OutputFilter + 'a,
        F: FnOnce(Box<dyn OutputFilter + 'a>) -> L,
    {
        self.top = Box::new(wrap(self.top));
        self.layers.push(name);
        self
    }

    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    /// Emits every layer's trailing framing, outermost first.
    pub fn close(self) -> io::Result<()> {
        self.top.close()
    }
}

impl Write for OutputChain<'_> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.top.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.top.flush()
    }
}

/// Reader that hands out at most one byte per call.
///
/// Used by tests to exercise filters under the worst read granularity.
#[cfg(test)]
pub(crate) struct Trickle<R>(pub R);

#[cfg(test)]
impl<R: Read> Read for Trickle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match buf.len() {
            0 => Ok(0),
            _ => self.0.read(&mut buf[..1]),
        }
    }
}
