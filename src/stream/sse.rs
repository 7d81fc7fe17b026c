//! Incremental parser for line-delimited `data:` frames.
//!
//! `OpenAI`-compatible backends send one JSON payload per `data:` line. Bytes
//! arrive in arbitrary transport-sized pieces, so a line (and any UTF-8 code
//! point inside it) may be split across reads; only complete lines are
//! decoded.
use bytes::BytesMut;
use memchr::memchr_iter;

/// Compact the buffer once this many consumed bytes sit at its front.
const COMPACT_THRESHOLD: usize = 8 * 1024;

/// Incremental `data:` line parser.
///
/// Feed raw bytes with [`DataLineParser::feed_into`]; each complete `data:`
/// line yields one payload string. Blank lines, comments (`:`), and
/// `event:`/`id:`/`retry:` fields are ignored.
#[derive(Debug, Default)]
pub struct DataLineParser {
    buffer: BytesMut,
    read_offset: usize,
}

impl DataLineParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and append the payload of every complete `data:` line.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        let scan_start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut processed_up_to = self.read_offset;
        for rel_pos in memchr_iter(b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            Self::process_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
        }
        self.read_offset = processed_up_to;

        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2
                || self.read_offset >= COMPACT_THRESHOLD);
        if should_compact {
            let _ = self.buffer.split_to(self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish_into(&mut self, out: &mut Vec<String>) {
        if self.read_offset < self.buffer.len() {
            Self::process_line(&self.buffer[self.read_offset..], out);
        }
        self.buffer.clear();
        self.read_offset = 0;
    }

    /// Bytes buffered but not yet consumed as a complete line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }

    fn process_line(line: &[u8], out: &mut Vec<String>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(value) = line.strip_prefix(b"data:") else {
            return;
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);
        if value.is_empty() {
            return;
        }
        out.push(String::from_utf8_lossy(value).into_owned());
    }
}
