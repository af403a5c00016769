use super::OutputFilter;
use crate::http::encoding::Encoding;
use bzip2::{bufread::BzDecoder, write::BzEncoder};
use flate2::{
    bufread::{MultiGzDecoder, ZlibDecoder},
    write::{GzEncoder, ZlibEncoder},
    Compression,
};
use std::io::{self, BufRead, BufReader, Read, Write};

/// Removes one content coding from a byte stream.
///
/// `deflate` is the zlib-wrapped format of RFC 9110, section 8.4.1.2.
pub struct DecodeReader<R: BufRead> {
    inner: Decoder<R>,
}

enum Decoder<R: BufRead> {
    Identity(R),
    Gzip(MultiGzDecoder<R>),
    Deflate(ZlibDecoder<R>),
    Bzip2(BzDecoder<R>),
}

impl<R: BufRead> DecodeReader<R> {
    pub fn new(encoding: Encoding, source: R) -> Self {
        let inner = match encoding {
            Encoding::Identity => Decoder::Identity(source),
            Encoding::Gzip => Decoder::Gzip(MultiGzDecoder::new(source)),
            Encoding::Deflate => Decoder::Deflate(ZlibDecoder::new(source)),
            Encoding::Bzip2 => Decoder::Bzip2(BzDecoder::new(source)),
        };
        Self { inner }
    }

    /// Same as [`new`](Self::new), buffered so it can be stacked on an input chain.
    pub fn buffered(encoding: Encoding, source: R) -> BufReader<Self> {
        BufReader::new(Self::new(encoding, source))
    }
}

impl<R: BufRead> Read for DecodeReader<R> {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Decoder::Identity(r) => r.read(buf),
            Decoder::Gzip(r) => r.read(buf),
            Decoder::Deflate(r) => r.read(buf),
            Decoder::Bzip2(r) => r.read(buf),
        }
    }
}

/// Applies one content coding to everything written through it.
///
/// Compressed output is only complete after [`finish`](EncodeWriter::finish).
pub struct EncodeWriter<W: Write> {
    inner: Encoder<W>,
}

enum Encoder<W: Write> {
    Identity(W),
    Gzip(GzEncoder<W>),
    Deflate(ZlibEncoder<W>),
    Bzip2(BzEncoder<W>),
}

impl<W: Write> EncodeWriter<W> {
    pub fn new(encoding: Encoding, sink: W) -> Self {
        let inner = match encoding {
            Encoding::Identity => Encoder::Identity(sink),
            Encoding::Gzip => Encoder::Gzip(GzEncoder::new(sink, Compression::default())),
            Encoding::Deflate => Encoder::Deflate(ZlibEncoder::new(sink, Compression::default())),
            Encoding::Bzip2 => {
                Encoder::Bzip2(BzEncoder::new(sink, bzip2::Compression::default()))
            }
        };
        Self { inner }
    }

    /// Writes the coding's trailer and returns the sink.
    pub fn finish(self) -> io::Result<W> {
        match self.inner {
            Encoder::Identity(w) => Ok(w),
            Encoder::Gzip(w) => w.finish(),
            Encoder::Deflate(w) => w.finish(),
            Encoder::Bzip2(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for EncodeWriter<W> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Encoder::Identity(w) => w.write(buf),
            Encoder::Gzip(w) => w.write(buf),
            Encoder::Deflate(w) => w.write(buf),
            Encoder::Bzip2(w) => w.write(buf),
        }
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Encoder::Identity(w) => w.flush(),
            Encoder::Gzip(w) => w.flush(),
            Encoder::Deflate(w) => w.flush(),
            Encoder::Bzip2(w) => w.flush(),
        }
    }
}

impl<W: OutputFilter> OutputFilter for EncodeWriter<W> {
    fn close(self: Box<Self>) -> io::Result<()> {
        W::close(Box::new(self.finish()?))
    }
}

/// Runs `data` through a coding in memory.
pub(crate) fn encode_all(encoding: Encoding, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut writer = EncodeWriter::new(encoding, Vec::with_capacity(data.len() / 2 + 64));
    writer.write_all(data)?;
    writer.finish()
}

/// Removes a coding from `data` in memory, refusing output above `limit` bytes.
pub(crate) fn decode_all(encoding: Encoding, data: &[u8], limit: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    DecodeReader::new(encoding, data)
        .take(limit + 1)
        .read_to_end(&mut out)?;

    match out.len() as u64 > limit {
        true => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "decoded representation exceeds limit",
        )),
        false => Ok(out),
    }
}
