//! Boundary splitting for `multipart/*` bodies (RFC 2046 §5.1).

/// Iterates over the body parts of a multipart entity, in document order.
///
/// Each yielded slice is one complete sub-entity (its headers and body). The
/// line break before a delimiter belongs to the delimiter. Preamble and
/// epilogue are skipped; a missing close delimiter ends the last part at the
/// end of the data.
pub struct MultipartReader<'a> {
    data: &'a [u8],
    delimiter: Vec<u8>,
    pos: usize,
    state: State,
    found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Parts,
    Done,
}

/// A delimiter line found in the data.
struct Delimiter {
    line_start: usize,
    next_line: usize,
    close: bool,
}

impl<'a> MultipartReader<'a> {
    pub fn new(data: &'a [u8], boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            data,
            delimiter,
            pos: 0,
            state: State::Preamble,
            found: false,
        }
    }

    /// Byte offset just past what has been consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether any delimiter line has been seen so far.
    pub fn found_delimiter(&self) -> bool {
        self.found
    }

    /// The next sub-entity, or `None` once the parts are exhausted.
    pub fn next_part(&mut self) -> Option<&'a [u8]> {
        if self.state == State::Preamble {
            let Some(first) = self.find_delimiter(0) else {
                self.state = State::Done;
                return None;
            };
            self.found = true;
            self.pos = first.next_line;
            self.state = if first.close { State::Done } else { State::Parts };
        }
        if self.state == State::Done {
            return None;
        }

        match self.find_delimiter(self.pos) {
            Some(delim) => {
                let end = strip_line_break(self.data, self.pos, delim.line_start);
                let part = &self.data[self.pos..end];
                self.pos = delim.next_line;
                if delim.close {
                    self.state = State::Done;
                }
                Some(part)
            }
            None => {
                self.state = State::Done;
                let part = &self.data[self.pos..];
                self.pos = self.data.len();
                if part.is_empty() {
                    None
                } else {
                    Some(part)
                }
            }
        }
    }

    /// Find the first delimiter line starting at or after `from` (a line start).
    fn find_delimiter(&self, from: usize) -> Option<Delimiter> {
        let mut line_start = from;
        while line_start < self.data.len() {
            let (line_end, next_line) = match self.data[line_start..].iter().position(|&b| b == b'\n') {
                Some(i) => (line_start + i, line_start + i + 1),
                None => (self.data.len(), self.data.len()),
            };
            if let Some(close) = self.delimiter_kind(&self.data[line_start..line_end]) {
                return Some(Delimiter {
                    line_start,
                    next_line,
                    close,
                });
            }
            line_start = next_line;
        }
        None
    }

    /// `Some(close)` if `line` is a delimiter line.
    fn delimiter_kind(&self, line: &[u8]) -> Option<bool> {
        let rest = line.strip_prefix(self.delimiter.as_slice())?;
        let (rest, close) = match rest.strip_prefix(b"--") {
            Some(r) => (r, true),
            None => (rest, false),
        };
        if rest.iter().all(|&b| b == b' ' || b == b'\t' || b == b'\r') {
            Some(close)
        } else {
            None
        }
    }
}

impl<'a> Iterator for MultipartReader<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.next_part()
    }
}

/// End of a part whose delimiter line starts at `line_start`: drop the CRLF
/// or LF that precedes it.
fn strip_line_break(data: &[u8], part_start: usize, line_start: usize) -> usize {
    let mut end = line_start;
    if end > part_start && data[end - 1] == b'\n' {
        end -= 1;
        if end > part_start && data[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}
