use std::io::{self, BufRead, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    /// Delimiter matched and its padding consumed.
    Found,
    /// Source ended before the delimiter appeared.
    Exhausted,
}

/// Emits the bytes that precede a literal delimiter, then reports end of stream.
///
/// The filter keeps a lookahead window exactly as long as the delimiter. Bytes
/// leave the window only once they can no longer be the start of a match; the
/// trailing `matched` bytes of the window are always a prefix of the delimiter.
/// Matching uses the Knuth-Morris-Pratt failure function, so every input byte is
/// scanned once no matter how the source or the caller slices the stream.
///
/// Once the delimiter is found, transport padding after it is consumed: optional
/// spaces and tabs, then either `--` (the final boundary: the rest of the source is
/// drained and [`is_final`](Self::is_final) becomes `true`) or a CRLF, leaving the
/// source at the start of the next segment.
///
/// # Examples
/// ```
/// use maker_http::filter::BoundaryFilter;
/// use std::io::Read;
///
/// let body = b"first part\r\n--XyZ\r\nsecond part\r\n--XyZ--\r\nepilogue";
/// let mut filter = BoundaryFilter::new(&body[..], b"\r\n--XyZ");
///
/// let mut part = String::new();
/// filter.read_to_string(&mut part).unwrap();
/// assert_eq!(part, "first part");
///
/// assert!(filter.next_segment());
/// part.clear();
/// filter.read_to_string(&mut part).unwrap();
/// assert_eq!(part, "second part");
/// assert!(filter.is_final());
/// ```
#[derive(Debug)]
pub struct BoundaryFilter<R> {
    source: R,
    delimiter: Box<[u8]>,
    failure: Box<[usize]>,

    window: Box<[u8]>,
    filled: usize,
    matched: usize,

    state: State,
    is_final: bool,
}

impl<R: BufRead> BoundaryFilter<R> {
    pub fn new(source: R, delimiter: &[u8]) -> Self {
        Self {
            source,
            delimiter: delimiter.into(),
            failure: failure_table(delimiter),
            window: vec![0; delimiter.len()].into_boxed_slice(),
            filled: 0,
            matched: 0,
            state: State::Reading,
            is_final: false,
        }
    }

    /// `true` after the closing `--` delimiter has been seen.
    #[inline]
    pub const fn is_final(&self) -> bool {
        self.is_final
    }

    /// `true` once the current segment ended on the delimiter.
    #[inline]
    pub fn found(&self) -> bool {
        self.state == State::Found
    }

    /// Re-arms the filter for the segment after the delimiter.
    ///
    /// Returns `false` when there is no next segment: the final boundary was seen,
    /// or the source ran out without a delimiter.
    pub fn next_segment(&mut self) -> bool {
        if self.state != State::Found || self.is_final {
            return false;
        }

        self.state = State::Reading;
        true
    }

    /// Gives the source back. Bytes held in the lookahead window are dropped, so
    /// this is only lossless after the delimiter was found.
    #[inline]
    pub fn into_inner(self) -> R {
        self.source
    }

    fn emit(&mut self, buf: &mut [u8], available: usize) -> usize {
        let len = available.min(buf.len());

        buf[..len].copy_from_slice(&self.window[..len]);
        self.window.copy_within(len..self.filled, 0);
        self.filled -= len;
        len
    }

    // Tops the window up and advances the automaton over the new bytes only.
    fn refill(&mut self) -> io::Result<bool> {
        let source = self.source.fill_buf()?;
        if source.is_empty() {
            return Ok(false);
        }

        let len = source.len().min(self.window.len() - self.filled);
        for (slot, &byte) in self.window[self.filled..].iter_mut().zip(&source[..len]) {
            *slot = byte;

            while self.matched > 0 && self.delimiter[self.matched] != byte {
                self.matched = self.failure[self.matched - 1];
            }
            if self.delimiter[self.matched] == byte {
                self.matched += 1;
            }
        }

        self.source.consume(len);
        self.filled += len;
        Ok(true)
    }

    #[inline]
    fn peek(&mut self) -> io::Result<Option<u8>> {
        Ok(self.source.fill_buf()?.first().copied())
    }

    fn consume_padding(&mut self) -> io::Result<()> {
        loop {
            let buf = self.source.fill_buf()?;
            let blanks = buf.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
            let more = blanks == buf.len() && blanks > 0;

            self.source.consume(blanks);
            if !more {
                break;
            }
        }

        match self.peek()? {
            Some(b'-') => {
                self.source.consume(1);
                if self.peek()? == Some(b'-') {
                    self.source.consume(1);
                    self.is_final = true;
                    io::copy(&mut self.source, &mut io::sink())?;
                }
            }
            Some(b'\r') => {
                self.source.consume(1);
                if self.peek()? == Some(b'\n') {
                    self.source.consume(1);
                }
            }
            Some(b'\n') => self.source.consume(1),
            _ => {}
        }

        Ok(())
    }
}

impl<R: BufRead> Read for BoundaryFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            match self.state {
                State::Found => return Ok(0),
                State::Exhausted => {
                    let available = self.filled;
                    return Ok(self.emit(buf, available));
                }
                State::Reading => {}
            }

            let safe = self.filled - self.matched;
            if safe > 0 {
                return Ok(self.emit(buf, safe));
            }

            // Whole window is a delimiter prefix; only a full window can be a match.
            if self.matched == self.delimiter.len() {
                self.filled = 0;
                self.matched = 0;
                self.state = State::Found;
                self.consume_padding()?;
                return Ok(0);
            }

            if !self.refill()? {
                self.state = State::Exhausted;
            }
        }
    }
}

fn failure_table(pattern: &[u8]) -> Box<[usize]> {
    let mut table = vec![0; pattern.len()];
    let mut len = 0;

    for i in 1..pattern.len() {
        while len > 0 && pattern[i] != pattern[len] {
            len = table[len - 1];
        }
        if pattern[i] == pattern[len] {
            len += 1;
        }
        table[i] = len;
    }

    table.into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Trickle;
    use std::io::{BufReader, Cursor};

    fn run(input: &[u8], delimiter: &[u8], capacity: usize, read_size: usize) -> Vec<u8> {
        let source = BufReader::with_capacity(capacity, Trickle(Cursor::new(input.to_vec())));
        let mut filter = BoundaryFilter::new(source, delimiter);
        let mut out = Vec::new();
        let mut buf = vec![0u8; read_size];

        loop {
            match filter.read(&mut buf).unwrap() {
                0 => return out,
                n => out.extend_from_slice(&buf[..n]),
            }
        }
    }

    const GRANULARITY: [(usize, usize); 5] = [(1, 1), (1, 64), (3, 2), (64, 1), (8192, 8192)];

    #[test]
    fn failure_function() {
        #[rustfmt::skip]
        let cases: [(&[u8], &[usize]); 5] = [
            (b"", &[]),
            (b"a", &[0]),
            (b"aaaa", &[0, 1, 2, 3]),
            (b"abab", &[0, 0, 1, 2]),
            (b"\r\n--\r\n-", &[0, 0, 0, 0, 1, 2, 3]),
        ];

        for (pattern, expected) in cases {
            assert_eq!(&*failure_table(pattern), expected);
        }
    }

    #[test]
    fn payload_before_delimiter() {
        for payload in ["", "ab", "abcd", "\n", "\nfo", "\nfo\nfo-", "x\n\nfofoo"] {
            let input = format!("{payload}\nfoo");

            for (capacity, read_size) in GRANULARITY {
                let out = run(input.as_bytes(), b"\nfoo", capacity, read_size);
                assert_eq!(out, payload.as_bytes(), "{payload:?} at {capacity}/{read_size}");
            }
        }
    }

    #[test]
    fn self_overlapping_delimiter() {
        #[rustfmt::skip]
        let cases: [(&str, &str, &str); 4] = [
            ("aaab", "aab", "a"),
            ("ababac", "abac", "ab"),
            ("\r\n\r\n--b", "\r\n--b", "\r\n"),
            ("x\r\n-\r\n--bb", "\r\n--b", "x\r\n-"),
        ];

        for (input, delimiter, expected) in cases {
            for (capacity, read_size) in GRANULARITY {
                let out = run(input.as_bytes(), delimiter.as_bytes(), capacity, read_size);
                assert_eq!(out, expected.as_bytes(), "{input:?} at {capacity}/{read_size}");
            }
        }
    }

    #[test]
    fn truncated_input() {
        for payload in ["", "ab", "abcd", "abc\nfo"] {
            for (capacity, read_size) in GRANULARITY {
                let out = run(payload.as_bytes(), b"\nfoo", capacity, read_size);
                assert_eq!(out, payload.as_bytes());
            }
        }
    }

    #[test]
    fn empty_delimiter() {
        assert_eq!(run(b"", b"", 1, 1), b"");
        assert_eq!(run(b"", b"", 64, 64), b"");

        let mut filter = BoundaryFilter::new(&b"data"[..], b"");
        assert_eq!(filter.read(&mut [0u8; 4]).unwrap(), 0);
        assert!(filter.found());
    }

    #[test]
    fn padding_and_segments() {
        let input = b"one\r\n--sep  \t\r\ntwo\r\n--sep\r\n\r\n--sep --\r\nignored epilogue";

        for (capacity, _) in GRANULARITY {
            let source = BufReader::with_capacity(capacity, Trickle(Cursor::new(&input[..])));
            let mut filter = BoundaryFilter::new(source, b"\r\n--sep");
            let mut parts = Vec::new();

            loop {
                let mut part = String::new();
                filter.read_to_string(&mut part).unwrap();
                parts.push(part);

                if !filter.next_segment() {
                    break;
                }
            }

            assert_eq!(parts, ["one", "two", ""]);
            assert!(filter.is_final());

            let mut rest = Vec::new();
            filter.into_inner().read_to_end(&mut rest).unwrap();
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn source_left_at_next_segment() {
        let mut source = Cursor::new(&b"head\r\n--b\r\nBODY"[..]);
        let mut part = Vec::new();

        let mut filter = BoundaryFilter::new(&mut source, b"\r\n--b");
        filter.read_to_end(&mut part).unwrap();
        assert!(filter.found());
        assert!(!filter.is_final());

        assert_eq!(part, b"head");
        assert_eq!(source.position(), 11);
    }
}
