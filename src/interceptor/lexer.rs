use std::borrow::Cow;
use std::sync::LazyLock;

use memchr::{memchr_iter, memmem};

// Incremental lexer for `<tool_call>` markup embedded in reasoning text.
//
//   <tool_call>name
//   <arg_key>k</arg_key><arg_value>v</arg_value>
//   </tool_call>
//
// Text is appended as it streams in. Delimiter search resumes where the last
// scan stopped, consumed input is drained from the front of the buffer, and
// outside a tag only a tail that could still start an open tag is retained.

pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";
const ARG_KEY_OPEN: &str = "<arg_key>";
const ARG_KEY_CLOSE: &str = "</arg_key>";
const ARG_VALUE_OPEN: &str = "<arg_value>";
const ARG_VALUE_CLOSE: &str = "</arg_value>";

/// Maximum size of one in-progress tag (512 KiB).
pub const DEFAULT_MAX_TAG_BYTES: usize = 512 * 1024;

static TOOL_CALL_OPEN_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(TOOL_CALL_OPEN.as_bytes()));
static TOOL_CALL_CLOSE_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(TOOL_CALL_CLOSE.as_bytes()));

/// A tool call recovered from markup.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    OutsideTag,
    InsideTag,
    InsideKey,
    InsideValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    ToolCallOpen,
    ToolCallClose,
    KeyOpen,
    KeyClose,
    ValueOpen,
    ValueClose,
}

impl Delimiter {
    const fn text(self) -> &'static str {
        match self {
            Self::ToolCallOpen => TOOL_CALL_OPEN,
            Self::ToolCallClose => TOOL_CALL_CLOSE,
            Self::KeyOpen => ARG_KEY_OPEN,
            Self::KeyClose => ARG_KEY_CLOSE,
            Self::ValueOpen => ARG_VALUE_OPEN,
            Self::ValueClose => ARG_VALUE_CLOSE,
        }
    }
}

const OUTSIDE_DELIMS: &[Delimiter] = &[Delimiter::ToolCallOpen];
const TAG_DELIMS: &[Delimiter] = &[
    Delimiter::KeyOpen,
    Delimiter::ValueOpen,
    Delimiter::ToolCallClose,
];
const KEY_DELIMS: &[Delimiter] = &[Delimiter::KeyClose, Delimiter::ToolCallClose];
const VALUE_DELIMS: &[Delimiter] = &[Delimiter::ValueClose, Delimiter::ToolCallClose];

enum Scan {
    Found { pos: usize, delimiter: Delimiter },
    /// The buffer ends with a prefix of a delimiter starting at `pos`.
    Partial { pos: usize },
    NotFound,
}

/// Scan `buffer[from..]` for the earliest delimiter in `candidates`.
fn scan(buffer: &[u8], from: usize, candidates: &[Delimiter]) -> Scan {
    let from = from.min(buffer.len());
    for rel in memchr_iter(b'<', &buffer[from..]) {
        let pos = from + rel;
        let rest = &buffer[pos..];
        let mut partial = false;
        for &delimiter in candidates {
            let text = delimiter.text().as_bytes();
            if rest.starts_with(text) {
                return Scan::Found { pos, delimiter };
            }
            if rest.len() < text.len() && text.starts_with(rest) {
                partial = true;
            }
        }
        if partial {
            return Scan::Partial { pos };
        }
    }
    Scan::NotFound
}

/// Streaming `<tool_call>` lexer.
#[derive(Debug)]
pub struct TagLexer {
    buffer: String,
    scan_from: usize,
    state: LexState,
    segment_start: usize,
    name: Option<String>,
    current_key: Option<String>,
    arguments: serde_json::Map<String, serde_json::Value>,
    max_tag_bytes: usize,
}

impl TagLexer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_tag_bytes(DEFAULT_MAX_TAG_BYTES)
    }

    #[must_use]
    pub fn with_max_tag_bytes(max_tag_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            scan_from: 0,
            state: LexState::OutsideTag,
            segment_start: 0,
            name: None,
            current_key: None,
            arguments: serde_json::Map::new(),
            max_tag_bytes,
        }
    }

    /// Bytes currently retained.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn in_tag(&self) -> bool {
        self.state != LexState::OutsideTag
    }

    /// Append `text` and push every tool call completed by it into `out`.
    pub fn feed(&mut self, text: &str, out: &mut Vec<ParsedToolCall>) {
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);

        loop {
            let candidates = match self.state {
                LexState::OutsideTag => OUTSIDE_DELIMS,
                LexState::InsideTag => TAG_DELIMS,
                LexState::InsideKey => KEY_DELIMS,
                LexState::InsideValue => VALUE_DELIMS,
            };
            match scan(self.buffer.as_bytes(), self.scan_from, candidates) {
                Scan::Found { pos, delimiter } => self.on_delimiter(pos, delimiter, out),
                Scan::Partial { pos } => {
                    self.park(pos);
                    break;
                }
                Scan::NotFound => {
                    self.park(self.buffer.len());
                    break;
                }
            }
        }

        if self.in_tag() && self.buffer.len() > self.max_tag_bytes {
            tracing::warn!(
                buffered = self.buffer.len(),
                limit = self.max_tag_bytes,
                "tool_call markup exceeded buffer limit, dropping tag"
            );
            self.buffer.clear();
            self.reset_tag();
        }
    }

    fn on_delimiter(&mut self, pos: usize, delimiter: Delimiter, out: &mut Vec<ParsedToolCall>) {
        let end = pos + delimiter.text().len();
        match delimiter {
            Delimiter::ToolCallOpen => {
                self.buffer.drain(..end);
                self.scan_from = 0;
                self.segment_start = 0;
                self.state = LexState::InsideTag;
            }
            Delimiter::KeyOpen | Delimiter::ValueOpen => {
                self.capture_name(pos);
                self.state = if delimiter == Delimiter::KeyOpen {
                    LexState::InsideKey
                } else {
                    LexState::InsideValue
                };
                self.segment_start = end;
                self.scan_from = end;
            }
            Delimiter::KeyClose => {
                let key = self.buffer[self.segment_start..pos].trim();
                self.current_key = (!key.is_empty()).then(|| key.to_string());
                self.state = LexState::InsideTag;
                self.scan_from = end;
            }
            Delimiter::ValueClose => {
                let raw = self.buffer[self.segment_start..pos].trim();
                if let Some(key) = self.current_key.take() {
                    let value = serde_json::from_str(raw)
                        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
                    self.arguments.insert(key, value);
                }
                self.state = LexState::InsideTag;
                self.scan_from = end;
            }
            Delimiter::ToolCallClose => {
                if self.state == LexState::InsideTag {
                    self.capture_name(pos);
                    self.complete_tag(out);
                } else {
                    tracing::warn!("tool_call closed inside an argument, dropping tag");
                }
                self.buffer.drain(..end);
                self.reset_tag();
            }
        }
    }

    /// Record the name on the first delimiter seen inside a tag.
    fn capture_name(&mut self, pos: usize) {
        if self.name.is_some() {
            return;
        }
        let name = self.buffer[..pos]
            .trim()
            .lines()
            .next()
            .unwrap_or_default()
            .trim();
        self.name = Some(name.to_string());
    }

    fn complete_tag(&mut self, out: &mut Vec<ParsedToolCall>) {
        let name = self.name.take().unwrap_or_default();
        if name.is_empty() {
            tracing::warn!("tool_call markup without a function name, dropping tag");
            return;
        }
        out.push(ParsedToolCall {
            name,
            arguments: std::mem::take(&mut self.arguments),
        });
    }

    fn reset_tag(&mut self) {
        self.state = LexState::OutsideTag;
        self.scan_from = 0;
        self.segment_start = 0;
        self.name = None;
        self.current_key = None;
        self.arguments.clear();
    }

    /// Remember where scanning resumes; outside a tag, drop text that can
    /// no longer be part of an open tag.
    fn park(&mut self, resume_at: usize) {
        if self.state == LexState::OutsideTag {
            self.buffer.drain(..resume_at);
            self.scan_from = 0;
        } else {
            self.scan_from = resume_at;
        }
    }
}

impl Default for TagLexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove every complete `<tool_call>…</tool_call>` region from `text`.
#[must_use]
pub fn strip_tool_call_markup(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let Some(first_open) = TOOL_CALL_OPEN_FINDER.find(bytes) else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut open = Some(first_open);
    while let Some(open_pos) = open {
        let body_start = open_pos + TOOL_CALL_OPEN.len();
        let Some(close_rel) = TOOL_CALL_CLOSE_FINDER.find(&bytes[body_start..]) else {
            break;
        };
        out.push_str(&text[cursor..open_pos]);
        cursor = body_start + close_rel + TOOL_CALL_CLOSE.len();
        open = TOOL_CALL_OPEN_FINDER
            .find(&bytes[cursor..])
            .map(|rel| cursor + rel);
    }
    out.push_str(&text[cursor..]);
    Cow::Owned(out)
}
