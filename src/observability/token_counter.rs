use std::time::Duration;

use tracing::info;

use crate::observability::usage::ScaledUsage;
use crate::protocol::anthropic::{AnthropicRequest, ContentBlock, MessageContent, SystemPrompt};

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`, rounded up) to avoid loading
/// model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_for_len(text.len())
}

#[must_use]
pub fn estimate_tokens_for_len(len: usize) -> u64 {
    (len as u64).div_ceil(4)
}

/// Estimate the prompt size of an Anthropic request.
///
/// Sums the system prompt, every textual block in the history, and the
/// serialized tool definitions. Images are not counted.
#[must_use]
pub fn estimate_request_tokens(request: &AnthropicRequest) -> u64 {
    let mut total: u64 = 0;

    match &request.system {
        Some(SystemPrompt::Text(text)) => total += estimate_tokens(text),
        Some(SystemPrompt::Blocks(blocks)) => {
            for block in blocks {
                if let Some(text) = block.get("text").and_then(serde_json::Value::as_str) {
                    total += estimate_tokens(text);
                }
            }
        }
        None => {}
    }

    for message in &request.messages {
        match &message.content {
            MessageContent::Text(text) => total += estimate_tokens(text),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    total += estimate_block_tokens(block);
                }
            }
        }
    }

    for tool in request.tools.iter().flatten() {
        total += estimate_tokens(&tool.name);
        if let Some(description) = &tool.description {
            total += estimate_tokens(description);
        }
        if let Ok(schema) = serde_json::to_string(&tool.input_schema) {
            total += estimate_tokens(&schema);
        }
    }

    total
}

fn estimate_block_tokens(block: &ContentBlock) -> u64 {
    match block {
        ContentBlock::Text { text } => estimate_tokens(text),
        ContentBlock::Thinking { thinking, .. } => estimate_tokens(thinking),
        ContentBlock::ToolUse { input, name, .. } => {
            estimate_tokens(name)
                + serde_json::to_string(input).map_or(0, |json| estimate_tokens(&json))
        }
        ContentBlock::ToolResult { content, .. } => match content {
            serde_json::Value::String(text) => estimate_tokens(text),
            other => serde_json::to_string(other).map_or(0, |json| estimate_tokens(&json)),
        },
        ContentBlock::Image { .. } | ContentBlock::Other => 0,
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, backend: &str, usage: &ScaledUsage, duration: Duration) {
    info!(
        model = model,
        backend = backend,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        cached_tokens = usage.cached_tokens,
        total_tokens = usage.total_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
