use super::{FilterError, OutputFilter};
use std::io::{self, BufRead, Read, Write};

// Chunk-size lines and trailer fields longer than this are rejected.
const MAX_LINE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Expecting `hex-size [; ext] CRLF`.
    SizeLine,
    /// Bytes of the current chunk still to be handed out.
    Data(u64),
    /// Payload of the current chunk consumed, CRLF expected.
    DataEnd,
    /// Zero-size chunk and trailer seen; the entity is over.
    Exhausted,
}

/// Decodes HTTP chunked transfer coding.
///
/// Only payload bytes are exposed. After the zero-size chunk the trailer section
/// is read and discarded and every further read returns `Ok(0)`; the source is left
/// positioned right after the entity.
///
/// # Examples
/// ```
/// use maker_http::filter::ChunkedFilter;
/// use std::io::Read;
///
/// let wire = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n";
/// let mut body = String::new();
///
/// ChunkedFilter::new(&wire[..]).read_to_string(&mut body).unwrap();
/// assert_eq!(body, "Wikipedia");
/// ```
#[derive(Debug)]
pub struct ChunkedFilter<R> {
    source: R,
    pending: Pending,
    line: Vec<u8>,
}

impl<R: BufRead> ChunkedFilter<R> {
    #[inline]
    pub fn new(source: R) -> Self {
        Self {
            source,
            pending: Pending::SizeLine,
            line: Vec::new(),
        }
    }

    /// `true` once the terminating chunk has been consumed.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pending == Pending::Exhausted
    }

    #[inline]
    pub fn into_inner(self) -> R {
        self.source
    }

    // Reads one CRLF-terminated line into `self.line`, without the CRLF.
    fn read_line(&mut self) -> io::Result<()> {
        self.line.clear();
        let read = (&mut self.source)
            .take(MAX_LINE as u64 + 2)
            .read_until(b'\n', &mut self.line)?;

        match self.line.last() {
            Some(b'\n') => {}
            _ if read > MAX_LINE => return Err(FilterError::LineTooLong(MAX_LINE).into()),
            _ => return Err(truncated()),
        }
        self.line.pop();

        match self.line.pop() {
            Some(b'\r') => Ok(()),
            _ => Err(FilterError::ChunkLineEnding.into()),
        }
    }

    fn read_size_line(&mut self) -> io::Result<u64> {
        self.read_line()?;

        let digits = self
            .line
            .iter()
            .position(|&b| b == b';' || b == b' ' || b == b'\t')
            .unwrap_or(self.line.len());
        let (size, rest) = self.line.split_at(digits);

        if !rest.is_empty() && !is_extension(rest) {
            return Err(FilterError::ChunkSize.into());
        }
        parse_hex(size).ok_or_else(|| FilterError::ChunkSize.into())
    }

    fn read_data_end(&mut self) -> io::Result<()> {
        let mut crlf = [0u8; 2];
        self.source.read_exact(&mut crlf)?;

        match &crlf {
            b"\r\n" => Ok(()),
            _ => Err(FilterError::ChunkTerminator.into()),
        }
    }

    fn read_trailer(&mut self) -> io::Result<()> {
        loop {
            self.read_line()?;
            if self.line.is_empty() {
                return Ok(());
            }
        }
    }
}

impl<R: BufRead> BufRead for ChunkedFilter<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        loop {
            match self.pending {
                Pending::Exhausted => return Ok(&[]),
                Pending::SizeLine => match self.read_size_line()? {
                    0 => {
                        self.read_trailer()?;
                        self.pending = Pending::Exhausted;
                    }
                    size => self.pending = Pending::Data(size),
                },
                Pending::DataEnd => {
                    self.read_data_end()?;
                    self.pending = Pending::SizeLine;
                }
                Pending::Data(remaining) => {
                    let buf = self.source.fill_buf()?;
                    if buf.is_empty() {
                        return Err(truncated());
                    }

                    let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                    return Ok(&buf[..len]);
                }
            }
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Pending::Data(remaining) = self.pending {
            let amt = (amt as u64).min(remaining);
            self.source.consume(amt as usize);

            self.pending = match remaining - amt {
                0 => Pending::DataEnd,
                left => Pending::Data(left),
            };
        }
    }
}

impl<R: BufRead> Read for ChunkedFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let available = self.fill_buf()?;
        let len = available.len().min(buf.len());

        buf[..len].copy_from_slice(&available[..len]);
        self.consume(len);
        Ok(len)
    }
}

#[inline]
fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "chunked entity truncated")
}

fn parse_hex(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }

    digits.iter().try_fold(0u64, |acc, &b| {
        let digit = (b as char).to_digit(16)?;
        acc.checked_mul(16)?.checked_add(digit as u64)
    })
}

// `*( BWS ";" BWS ext-name [ "=" ext-value ] )`, accepted without interpretation.
fn is_extension(rest: &[u8]) -> bool {
    let rest = rest
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .map_or(&b""[..], |start| &rest[start..]);

    rest.is_empty() || rest[0] == b';'
}

// WRITER

/// Frames every write as one chunk: `hex(n) CRLF <n bytes> CRLF`.
///
/// Zero-length writes emit nothing, so an empty write can never be mistaken for
/// the terminating chunk. [`finish`](ChunkedWriter::finish) (or
/// [`OutputFilter::close`]) writes `0 CRLF CRLF` and flushes.
#[derive(Debug)]
pub struct ChunkedWriter<W: Write> {
    inner: W,
}

impl<W: Write> ChunkedWriter<W> {
    #[inline]
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes the terminating chunk and returns the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        write!(self.inner, "{:x}\r\n", buf.len())?;
        self.inner.write_all(buf)?;
        self.inner.write_all(b"\r\n")?;
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: OutputFilter> OutputFilter for ChunkedWriter<W> {
    fn close(self: Box<Self>) -> io::Result<()> {
        W::close(Box::new(self.finish()?))
    }
}
