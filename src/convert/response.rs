use serde_json::Value;

use crate::observability::usage::{ScaledUsage, UsageAggregator};
use crate::protocol::anthropic::{AnthropicResponse, AnthropicUsage, ContentBlock};
use crate::protocol::mapping::{openai_finish_to_anthropic_stop, STOP_END_TURN};
use crate::protocol::openai_chat::{OpenAiChatResponse, OpenAiToolCall};
use crate::util::next_call_id;

/// Translate a complete `OpenAI` chat response into an Anthropic message.
///
/// Usage is scaled and folded into `aggregator` exactly once; the scaled
/// figures are returned alongside the message for logging.
#[must_use]
pub fn translate_response(
    response: OpenAiChatResponse,
    message_id: String,
    model: &str,
    aggregator: &UsageAggregator,
) -> (AnthropicResponse, ScaledUsage) {
    let mut content: Vec<ContentBlock> = Vec::new();
    let mut stop_reason = STOP_END_TURN;

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(reasoning) = choice.message.reasoning_text() {
            content.push(ContentBlock::Thinking {
                thinking: reasoning.into_owned(),
                signature: None,
            });
        }
        if let Some(text) = choice.message.content.filter(|text| !text.is_empty()) {
            content.push(ContentBlock::Text { text });
        }
        for call in choice.message.tool_calls.into_iter().flatten() {
            content.push(tool_use_block(call));
        }
        if let Some(reason) = choice.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            stop_reason = openai_finish_to_anthropic_stop(reason);
        }
    }

    if content.is_empty() {
        content.push(ContentBlock::text(""));
    }

    let scaled = aggregator.record(response.usage.as_ref());
    let message = AnthropicResponse {
        id: message_id,
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: scaled.input_tokens,
            output_tokens: scaled.output_tokens,
            cache_read_input_tokens: None,
        },
    };
    (message, scaled)
}

fn tool_use_block(call: OpenAiToolCall) -> ContentBlock {
    let input = serde_json::from_str::<Value>(&call.function.arguments)
        .ok()
        .filter(|value| !value.is_null())
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let id = if call.id.is_empty() {
        next_call_id()
    } else {
        call.id
    };
    ContentBlock::ToolUse {
        id,
        name: call.function.name,
        input,
    }
}
