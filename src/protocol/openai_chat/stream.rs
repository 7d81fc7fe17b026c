use std::borrow::Cow;

use super::{OpenAiDelta, OpenAiReasoningDetail, OpenAiResponseMessage, OpenAiStreamChunk};

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded `data:` payload from an `OpenAI` chat stream.
#[derive(Debug)]
pub enum OpenAiStreamData {
    Chunk(OpenAiStreamChunk),
    Done,
}

/// Parse a single `data:` payload (the text after `data:`).
///
/// # Errors
///
/// Returns the JSON error when the payload is neither `[DONE]` nor a valid
/// chunk object.
pub fn parse_openai_stream_data(data: &str) -> Result<OpenAiStreamData, serde_json::Error> {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(OpenAiStreamData::Done);
    }
    serde_json::from_str(data).map(OpenAiStreamData::Chunk)
}

impl OpenAiDelta {
    /// Reasoning text carried by this delta, first non-empty encoding wins.
    #[must_use]
    pub fn reasoning_text(&self) -> Option<Cow<'_, str>> {
        resolve_reasoning(
            self.reasoning.as_deref(),
            self.reasoning_content.as_deref(),
            self.reasoning_details.as_deref(),
        )
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|text| !text.is_empty())
    }
}

impl OpenAiResponseMessage {
    #[must_use]
    pub fn reasoning_text(&self) -> Option<Cow<'_, str>> {
        resolve_reasoning(
            self.reasoning.as_deref(),
            self.reasoning_content.as_deref(),
            self.reasoning_details.as_deref(),
        )
    }
}

fn resolve_reasoning<'a>(
    reasoning: Option<&'a str>,
    reasoning_content: Option<&'a str>,
    details: Option<&'a [OpenAiReasoningDetail]>,
) -> Option<Cow<'a, str>> {
    if let Some(text) = reasoning.filter(|s| !s.is_empty()) {
        return Some(Cow::Borrowed(text));
    }
    if let Some(text) = reasoning_content.filter(|s| !s.is_empty()) {
        return Some(Cow::Borrowed(text));
    }
    let details = details?;
    let mut fragments = details.iter().map(OpenAiReasoningDetail::fragment);
    let first = fragments.find(|s| !s.is_empty())?;
    let mut joined: Option<String> = None;
    for fragment in fragments.filter(|s| !s.is_empty()) {
        joined
            .get_or_insert_with(|| first.to_string())
            .push_str(fragment);
    }
    Some(joined.map_or(Cow::Borrowed(first), Cow::Owned))
}
