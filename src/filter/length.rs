use std::io::{self, BufRead, Read};

/// Bounds a source to exactly `limit` bytes.
///
/// Once the budget is spent every read returns `Ok(0)`, whatever the source still
/// holds, so bytes the client sends after the declared `Content-Length` stay on the
/// connection for the next request. A source that ends before the budget is spent
/// is a truncated entity and fails with [`io::ErrorKind::UnexpectedEof`].
#[derive(Debug)]
pub struct LengthFilter<R> {
    source: R,
    remaining: u64,
}

impl<R: BufRead> LengthFilter<R> {
    #[inline]
    pub fn new(source: R, limit: u64) -> Self {
        Self {
            source,
            remaining: limit,
        }
    }

    /// Bytes still owed by the source.
    #[inline]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    #[inline]
    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: BufRead> BufRead for LengthFilter<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.remaining == 0 {
            return Ok(&[]);
        }

        let remaining = self.remaining;
        let buf = self.source.fill_buf()?;
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "entity shorter than its declared length",
            ));
        }

        let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        Ok(&buf[..len])
    }

    #[inline]
    fn consume(&mut self, amt: usize) {
        let amt = amt.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        self.source.consume(amt);
        self.remaining -= amt as u64;
    }
}

impl<R: BufRead> Read for LengthFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let len = available.len().min(buf.len());

        buf[..len].copy_from_slice(&available[..len]);
        self.consume(len);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Trickle;
    use std::io::{BufReader, Cursor};

    #[test]
    fn stops_at_limit() {
        #[rustfmt::skip]
        let cases = [
            ("hello world", 5, "hello"),
            ("hello", 5, "hello"),
            ("hello", 0, ""),
            ("GET / HTTP/1.1\r\n", 3, "GET"),
        ];

        for (source, limit, expected) in cases {
            let mut filter = LengthFilter::new(Cursor::new(source.as_bytes()), limit);
            let mut out = String::new();

            filter.read_to_string(&mut out).unwrap();
            assert_eq!(out, expected);
            assert_eq!(filter.remaining(), 0);
        }
    }

    #[test]
    fn leaves_trailing_bytes_in_source() {
        let mut source = Cursor::new(&b"abcdeSMUGGLED"[..]);
        let mut out = Vec::new();

        LengthFilter::new(&mut source, 5).read_to_end(&mut out).unwrap();

        assert_eq!(out, b"abcde");
        assert_eq!(source.position(), 5);
    }

    #[test]
    fn byte_by_byte() {
        let source = BufReader::with_capacity(1, Trickle(Cursor::new(b"0123456789")));
        let mut filter = LengthFilter::new(source, 7);
        let mut out = Vec::new();

        filter.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123456");
    }

    #[test]
    fn truncated_source() {
        let mut filter = LengthFilter::new(Cursor::new(b"abc"), 10);
        let mut out = Vec::new();

        let err = filter.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(out, b"abc");
        assert_eq!(filter.remaining(), 7);
    }
}
