//! Content-Transfer-Encoding decoders (RFC 2045 §6) as streaming readers.
//!
//! Both decoders are forgiving: base64 skips anything outside its alphabet,
//! quoted-printable passes malformed escapes through as literal text.

use std::io::{self, BufRead, BufReader, Read};

use base64::Engine as _;

use super::header::{hex_val, LENIENT_BASE64};

/// Wrap `reader` with the decoder named by a `Content-Transfer-Encoding` value.
///
/// `7bit`, `8bit`, `binary`, an absent header and unknown encodings pass through.
pub fn decoder_for<'a, R: Read + 'a>(encoding: Option<&str>, reader: R) -> Box<dyn Read + 'a> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        Some("base64") => Box::new(Base64Decoder::new(reader)),
        Some("quoted-printable") => Box::new(QuotedPrintableDecoder::new(reader)),
        _ => Box::new(reader),
    }
}

/// Streaming base64 decoder that ignores whitespace and garbage bytes.
///
/// A `=` ends the current group, so several padded blocks glued together
/// decode as their concatenation.
pub struct Base64Decoder<R> {
    inner: R,
    pending: Vec<u8>,
    out: Vec<u8>,
    out_pos: usize,
    eof: bool,
}

impl<R: Read> Base64Decoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(4096),
            out: Vec::with_capacity(3072),
            out_pos: 0,
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        self.out.clear();
        self.out_pos = 0;
        let mut chunk = [0u8; 4096];
        while self.out.is_empty() && !self.eof {
            let n = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                self.eof = true;
                self.flush_partial()?;
                break;
            }
            for &b in &chunk[..n] {
                match b {
                    b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' => self.pending.push(b),
                    b'=' => self.flush_partial()?,
                    _ => {}
                }
            }
            let whole = self.pending.len() / 4 * 4;
            if whole > 0 {
                decode_into(&self.pending[..whole], &mut self.out)?;
                self.pending.drain(..whole);
            }
        }
        Ok(())
    }

    /// Decode whatever is pending, including a trailing 2- or 3-char group.
    fn flush_partial(&mut self) -> io::Result<()> {
        let usable = match self.pending.len() % 4 {
            1 => self.pending.len() - 1,
            _ => self.pending.len(),
        };
        if usable > 0 {
            decode_into(&self.pending[..usable], &mut self.out)?;
        }
        self.pending.clear();
        Ok(())
    }
}

fn decode_into(input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
    LENIENT_BASE64
        .decode_vec(input, out)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

impl<R: Read> Read for Base64Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.out_pos >= self.out.len() {
            self.fill()?;
        }
        let available = &self.out[self.out_pos..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.out_pos += n;
        Ok(n)
    }
}

/// Line-oriented quoted-printable decoder.
pub struct QuotedPrintableDecoder<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
    out: Vec<u8>,
    out_pos: usize,
}

impl<R: Read> QuotedPrintableDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: Vec::with_capacity(128),
            out: Vec::with_capacity(128),
            out_pos: 0,
        }
    }

    /// Decode the next input line into `out`. Returns `false` at EOF.
    fn next_line(&mut self) -> io::Result<bool> {
        self.out.clear();
        self.out_pos = 0;
        self.line.clear();
        if self.inner.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(false);
        }
        decode_qp_line(&self.line, &mut self.out);
        Ok(true)
    }
}

impl<R: Read> Read for QuotedPrintableDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.out_pos >= self.out.len() {
            if !self.next_line()? {
                return Ok(0);
            }
        }
        let available = &self.out[self.out_pos..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.out_pos += n;
        Ok(n)
    }
}

/// Decode one physical line, keeping its original line ending unless it is
/// a soft break (`=` at the end).
fn decode_qp_line(line: &[u8], out: &mut Vec<u8>) {
    let (content, ending): (&[u8], &[u8]) = if let Some(c) = line.strip_suffix(b"\r\n") {
        (c, b"\r\n")
    } else if let Some(c) = line.strip_suffix(b"\n") {
        (c, b"\n")
    } else {
        (line, b"")
    };

    // Transport padding: trailing whitespace is not part of the data.
    let mut end = content.len();
    while end > 0 && (content[end - 1] == b' ' || content[end - 1] == b'\t') {
        end -= 1;
    }
    let content = &content[..end];

    let (content, soft_break) = match content.strip_suffix(b"=") {
        Some(c) => (c, true),
        None => (content, false),
    };

    let mut i = 0;
    while i < content.len() {
        if content[i] == b'=' {
            if let (Some(hi), Some(lo)) = (
                content.get(i + 1).copied().and_then(hex_val),
                content.get(i + 2).copied().and_then(hex_val),
            ) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(content[i]);
        i += 1;
    }

    if !soft_break {
        out.extend_from_slice(ending);
    }
}
