use crate::protocol::anthropic::{
    AnthropicDelta, AnthropicStreamEvent, AnthropicUsage, ContentBlock,
};
use crate::util::{push_json_string_escaped, push_u64_decimal, push_usize_decimal};

/// Encode a typed Anthropic stream event as a full SSE frame
/// (`event: {name}\ndata: {json}\n\n`) appended to `out`.
///
/// Block deltas, starts and stops are written by hand; rare envelopes
/// (`message_start`, `error`) go through serde.
///
/// Returns `true` when a frame is produced.
pub fn encode_anthropic_event_frame(event: &AnthropicStreamEvent, out: &mut String) -> bool {
    match event {
        AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
            out.push_str(
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":",
            );
            push_usize_decimal(out, *index);
            match delta {
                AnthropicDelta::TextDelta { text } => {
                    out.push_str(",\"delta\":{\"type\":\"text_delta\",\"text\":");
                    push_json_string_escaped(out, text);
                }
                AnthropicDelta::ThinkingDelta { thinking } => {
                    out.push_str(",\"delta\":{\"type\":\"thinking_delta\",\"thinking\":");
                    push_json_string_escaped(out, thinking);
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    out.push_str(",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":");
                    push_json_string_escaped(out, partial_json);
                }
            }
            out.push_str("}}\n\n");
            true
        }
        AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            ContentBlock::Thinking {
                thinking,
                signature: None,
            } => {
                push_block_start_prefix(out, *index);
                out.push_str("{\"type\":\"thinking\",\"thinking\":");
                push_json_string_escaped(out, thinking);
                out.push_str("}}\n\n");
                true
            }
            ContentBlock::Text { text } => {
                push_block_start_prefix(out, *index);
                out.push_str("{\"type\":\"text\",\"text\":");
                push_json_string_escaped(out, text);
                out.push_str("}}\n\n");
                true
            }
            ContentBlock::ToolUse { id, name, input } if is_empty_object(input) => {
                push_block_start_prefix(out, *index);
                out.push_str("{\"type\":\"tool_use\",\"id\":");
                push_json_string_escaped(out, id);
                out.push_str(",\"name\":");
                push_json_string_escaped(out, name);
                out.push_str(",\"input\":{}}}\n\n");
                true
            }
            _ => encode_with_serde(event, out),
        },
        AnthropicStreamEvent::ContentBlockStop { index } => {
            out.push_str(
                "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":",
            );
            push_usize_decimal(out, *index);
            out.push_str("}\n\n");
            true
        }
        AnthropicStreamEvent::MessageDelta { delta, usage } => {
            out.push_str(
                "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":",
            );
            push_optional_string(out, delta.stop_reason.as_deref());
            out.push_str(",\"stop_sequence\":");
            push_optional_string(out, delta.stop_sequence.as_deref());
            out.push_str("},\"usage\":");
            push_usage(out, usage);
            out.push_str("}\n\n");
            true
        }
        AnthropicStreamEvent::MessageStop {} => {
            out.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
            true
        }
        AnthropicStreamEvent::Ping {} => {
            out.push_str("event: ping\ndata: {\"type\":\"ping\"}\n\n");
            true
        }
        AnthropicStreamEvent::MessageStart { .. } | AnthropicStreamEvent::Error { .. } => {
            encode_with_serde(event, out)
        }
    }
}

#[inline]
fn push_block_start_prefix(out: &mut String, index: usize) {
    out.push_str("event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":");
    push_usize_decimal(out, index);
    out.push_str(",\"content_block\":");
}

#[inline]
fn push_optional_string(out: &mut String, value: Option<&str>) {
    match value {
        Some(value) => push_json_string_escaped(out, value),
        None => out.push_str("null"),
    }
}

fn push_usage(out: &mut String, usage: &AnthropicUsage) {
    out.push_str("{\"input_tokens\":");
    push_u64_decimal(out, usage.input_tokens);
    out.push_str(",\"output_tokens\":");
    push_u64_decimal(out, usage.output_tokens);
    if let Some(cached) = usage.cache_read_input_tokens {
        out.push_str(",\"cache_read_input_tokens\":");
        push_u64_decimal(out, cached);
    }
    out.push('}');
}

fn is_empty_object(value: &serde_json::Value) -> bool {
    value.as_object().is_some_and(serde_json::Map::is_empty)
}

fn encode_with_serde(event: &AnthropicStreamEvent, out: &mut String) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => {
            out.push_str("event: ");
            out.push_str(event.event_name());
            out.push_str("\ndata: ");
            out.push_str(&json);
            out.push_str("\n\n");
            true
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                event = event.event_name(),
                "failed to serialize anthropic stream event"
            );
            false
        }
    }
}
