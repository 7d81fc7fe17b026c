use rustc_hash::FxHashSet;
use serde_json::{json, Value};

use crate::convert::schema::strip_uri_format;
use crate::interceptor::MarkupInterceptor;
use crate::protocol::anthropic::{
    AnthropicRequest, AnthropicTool, ContentBlock, ImageSource, MessageContent, SystemPrompt,
};
use crate::protocol::mapping::{anthropic_tool_choice_to_openai, thinking_budget_to_effort};
use crate::protocol::openai_chat::{
    OpenAiChatRequest, OpenAiMessage, OpenAiStop, OpenAiStreamOptions, OpenAiTool,
    OpenAiToolCall, OpenAiToolCallFunction, OpenAiToolFunction,
};
use crate::util::floor_char_boundary;

const INJECTION_PREVIEW_BYTES: usize = 20;

/// Per-backend knobs for request translation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions<'a> {
    /// Replaces the client's model name when set.
    pub model_override: Option<&'a str>,
    /// Appended to the last user turn when the client asked for thinking.
    pub ultrathink_prompt: Option<&'a str>,
}

/// Translate an Anthropic Messages request into an `OpenAI` chat request.
///
/// Every message passes through `interceptor`'s historical hook before it is
/// translated.
#[must_use]
pub fn translate_request(
    mut request: AnthropicRequest,
    mut interceptor: Option<&mut dyn MarkupInterceptor>,
    options: &TranslateOptions<'_>,
) -> OpenAiChatRequest {
    let stream = request.is_stream();
    let injection = ultrathink_injection(&request, options.ultrathink_prompt);

    let mut messages: Vec<OpenAiMessage> = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system.take().map(system_text) {
        if !system.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(Value::String(system)),
                ..OpenAiMessage::default()
            });
        }
    }

    let turns = std::mem::take(&mut request.messages);
    let last = turns.len().saturating_sub(1);
    for (index, mut turn) in turns.into_iter().enumerate() {
        if let Some(interceptor) = interceptor.as_deref_mut() {
            interceptor.on_historical_message(&mut turn);
        }
        match turn.role.as_str() {
            "user" => {
                let inject = injection.filter(|_| index == last);
                translate_user(turn.content, inject, &mut messages);
            }
            "assistant" => translate_assistant(turn.content, &mut messages),
            other => tracing::debug!(role = other, "skipping message with unsupported role"),
        }
    }

    let tools = request
        .tools
        .take()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.into_iter().map(translate_tool).collect());

    OpenAiChatRequest {
        model: options
            .model_override
            .map_or_else(|| request.model.clone(), str::to_string),
        messages,
        tools,
        tool_choice: request
            .tool_choice
            .as_ref()
            .map(anthropic_tool_choice_to_openai),
        stream: Some(stream),
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        stop: request
            .stop_sequences
            .take()
            .filter(|stops| !stops.is_empty())
            .map(OpenAiStop::Multi),
        reasoning_effort: thinking_budget_to_effort(request.thinking_budget()).map(str::to_string),
    }
}

/// The prompt to inject, when the request qualifies.
fn ultrathink_injection<'a>(request: &AnthropicRequest, prompt: Option<&'a str>) -> Option<&'a str> {
    let prompt = prompt.filter(|p| !p.is_empty())?;
    if request.thinking_budget() == 0 {
        return None;
    }
    request
        .messages
        .last()
        .is_some_and(|turn| turn.is_user())
        .then_some(prompt)
}

fn log_injection(user_text: &str) {
    let end = floor_char_boundary(user_text, INJECTION_PREVIEW_BYTES);
    let ellipsis = if end < user_text.len() { "..." } else { "" };
    let preview = format!("{}{ellipsis}", &user_text[..end]);
    tracing::info!(preview = %preview, "injected ultrathink prompt");
}

fn system_text(system: SystemPrompt) -> String {
    match system {
        SystemPrompt::Text(text) => text,
        SystemPrompt::Blocks(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(text) => Some(text.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect();
            parts.join("\n\n")
        }
    }
}

fn translate_user(content: MessageContent, inject: Option<&str>, out: &mut Vec<OpenAiMessage>) {
    let blocks = match content {
        MessageContent::Text(text) => {
            let text = match inject {
                Some(prompt) => {
                    log_injection(&text);
                    format!("{text}\n\n{prompt}")
                }
                None => text,
            };
            out.push(user_message(Value::String(text)));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts: Vec<Value> = Vec::with_capacity(blocks.len());
    let mut seen_results: FxHashSet<String> = FxHashSet::default();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(json!({"type": "text", "text": text})),
            ContentBlock::Image { source } => {
                if let Some(url) = image_url(&source) {
                    parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
                }
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                if !seen_results.insert(tool_use_id.clone()) {
                    continue;
                }
                out.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(Value::String(tool_result_text(&content))),
                    tool_call_id: Some(tool_use_id),
                    ..OpenAiMessage::default()
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } | ContentBlock::Other => {}
        }
    }

    if parts.is_empty() {
        return;
    }
    if let Some(prompt) = inject {
        let first_text = parts
            .iter()
            .find_map(|part| part.get("text").and_then(Value::as_str))
            .unwrap_or_default();
        log_injection(first_text);
        parts.push(json!({"type": "text", "text": prompt}));
    }

    let content = if parts.len() == 1 && parts[0]["type"] == "text" {
        let mut part = parts.swap_remove(0);
        part["text"].take()
    } else {
        Value::Array(parts)
    };
    out.push(user_message(content));
}

fn user_message(content: Value) -> OpenAiMessage {
    OpenAiMessage {
        role: "user".to_string(),
        content: Some(content),
        ..OpenAiMessage::default()
    }
}

fn translate_assistant(content: MessageContent, out: &mut Vec<OpenAiMessage>) {
    let blocks = match content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                out.push(OpenAiMessage {
                    role: "assistant".to_string(),
                    content: Some(Value::String(text)),
                    ..OpenAiMessage::default()
                });
            }
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut thinking: Vec<String> = Vec::new();
    let mut text: Vec<String> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();
    let mut seen_calls: FxHashSet<String> = FxHashSet::default();

    for block in blocks {
        match block {
            ContentBlock::Thinking { thinking: t, .. } => thinking.push(t),
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::ToolUse { id, name, input } => {
                if !seen_calls.insert(id.clone()) {
                    continue;
                }
                let arguments = if input.is_null() {
                    "{}".to_string()
                } else {
                    input.to_string()
                };
                tool_calls.push(OpenAiToolCall {
                    id,
                    type_: "function".to_string(),
                    function: OpenAiToolCallFunction { name, arguments },
                });
            }
            ContentBlock::ToolResult { .. } | ContentBlock::Image { .. } | ContentBlock::Other => {}
        }
    }

    let reasoning = thinking.join("\n");
    let content = text.join("\n");
    if reasoning.is_empty() && content.is_empty() && tool_calls.is_empty() {
        return;
    }
    out.push(OpenAiMessage {
        role: "assistant".to_string(),
        content: (!content.is_empty()).then_some(Value::String(content)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
    });
}

fn image_url(source: &ImageSource) -> Option<String> {
    match source.type_.as_str() {
        "base64" => {
            let media_type = source.media_type.as_deref().unwrap_or("image/png");
            let data = source.data.as_deref()?;
            Some(format!("data:{media_type};base64,{data}"))
        }
        "url" => source.url.clone(),
        _ => None,
    }
}

/// Flatten `tool_result` content to plain text.
#[must_use]
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            parts.join("\n")
        }
        other => other.to_string(),
    }
}

fn translate_tool(tool: AnthropicTool) -> OpenAiTool {
    let mut schema = tool.input_schema;
    strip_uri_format(&mut schema);
    OpenAiTool {
        type_: "function".to_string(),
        function: OpenAiToolFunction {
            name: tool.name,
            description: tool.description,
            parameters: (!schema.is_null()).then_some(schema),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::zhipu::ZhipuInterceptor;
    use crate::protocol::openai_chat::OpenAiToolChoice;

    fn request(value: Value) -> AnthropicRequest {
        serde_json::from_value(value).unwrap()
    }

    fn translate(value: Value) -> OpenAiChatRequest {
        translate_request(request(value), None, &TranslateOptions::default())
    }

    #[test]
    fn test_scalar_fields_and_streaming_options() {
        let out = translate(json!({
            "model": "claude-opus",
            "max_tokens": 2048,
            "temperature": 0.3,
            "stop_sequences": ["END"],
            "stream": true,
            "thinking": {"type": "enabled", "budget_tokens": 40000},
            "tool_choice": {"type": "any"},
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert_eq!(out.model, "claude-opus");
        assert_eq!(out.max_tokens, Some(2048));
        assert_eq!(out.temperature, Some(0.3));
        assert_eq!(out.stream, Some(true));
        assert_eq!(out.stream_options.and_then(|o| o.include_usage), Some(true));
        assert_eq!(out.reasoning_effort.as_deref(), Some("high"));
        assert_eq!(out.tool_choice, Some(OpenAiToolChoice::Mode("required".into())));
        assert!(matches!(out.stop, Some(OpenAiStop::Multi(ref s)) if s == &["END"]));
    }

    #[test]
    fn test_model_override_and_no_stream_options() {
        let out = translate_request(
            request(json!({"model": "claude", "messages": []})),
            None,
            &TranslateOptions {
                model_override: Some("glm-4.6"),
                ultrathink_prompt: None,
            },
        );
        assert_eq!(out.model, "glm-4.6");
        assert!(out.stream_options.is_none());
        assert!(out.reasoning_effort.is_none());
    }

    #[test]
    fn test_system_blocks_joined() {
        let out = translate(json!({
            "model": "m",
            "system": [{"type": "text", "text": "one"}, {"type": "text", "text": "two"}],
            "messages": []
        }));
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[0].content, Some(json!("one\n\ntwo")));
    }

    #[test]
    fn test_user_blocks_tool_results_first_and_deduplicated() {
        let out = translate(json!({
            "model": "m",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "QUJD"}},
                {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]},
                {"type": "tool_result", "tool_use_id": "t1", "content": "dup"}
            ]}]
        }));
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, "tool");
        assert_eq!(out.messages[0].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(out.messages[0].content, Some(json!("a\nb")));
        assert_eq!(
            out.messages[1].content,
            Some(json!([
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,QUJD"}}
            ]))
        );
    }

    #[test]
    fn test_single_text_part_collapses_to_string() {
        let out = translate(json!({
            "model": "m",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "only"}]}]
        }));
        assert_eq!(out.messages[0].content, Some(json!("only")));
    }

    #[test]
    fn test_assistant_blocks() {
        let out = translate(json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "a"},
                    {"type": "thinking", "thinking": "b"},
                    {"type": "text", "text": "x"},
                    {"type": "tool_use", "id": "c1", "name": "f", "input": {"k": 1}},
                    {"type": "tool_use", "id": "c1", "name": "f", "input": {"k": 1}}
                ]},
                {"role": "assistant", "content": [{"type": "redacted_thinking", "data": "z"}]}
            ]
        }));
        assert_eq!(out.messages.len(), 1);
        let message = &out.messages[0];
        assert_eq!(message.reasoning_content.as_deref(), Some("a\nb"));
        assert_eq!(message.content, Some(json!("x")));
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments, "{\"k\":1}");
    }

    #[test]
    fn test_tools_lose_uri_format() {
        let out = translate(json!({
            "model": "m",
            "messages": [],
            "tools": [{"name": "fetch", "description": "d", "input_schema": {
                "type": "object",
                "properties": {"url": {"type": "string", "format": "uri"}}
            }}]
        }));
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].function.name, "fetch");
        assert_eq!(
            tools[0].function.parameters,
            Some(json!({"type": "object", "properties": {"url": {"type": "string"}}}))
        );
    }

    #[test]
    fn test_ultrathink_only_on_last_user_turn_with_budget() {
        let options = TranslateOptions {
            model_override: None,
            ultrathink_prompt: Some("think hard"),
        };
        let with_budget = json!({
            "model": "m",
            "thinking": {"type": "enabled", "budget_tokens": 1024},
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "ok"},
                {"role": "user", "content": "second"}
            ]
        });
        let out = translate_request(request(with_budget.clone()), None, &options);
        assert_eq!(out.messages[0].content, Some(json!("first")));
        assert_eq!(out.messages[2].content, Some(json!("second\n\nthink hard")));
        assert_eq!(out.reasoning_effort.as_deref(), Some("low"));

        let mut without_budget = with_budget;
        without_budget["thinking"]["budget_tokens"] = json!(0);
        let out = translate_request(request(without_budget), None, &options);
        assert_eq!(out.messages[2].content, Some(json!("second")));
    }

    #[test]
    fn test_interceptor_cleans_history() {
        let mut interceptor = ZhipuInterceptor::new();
        let out = translate_request(
            request(json!({
                "model": "m",
                "messages": [{"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "go<tool_call>f</tool_call>"},
                    {"type": "tool_use", "id": "c", "name": "f", "input": {}}
                ]}]
            })),
            Some(&mut interceptor),
            &TranslateOptions::default(),
        );
        assert_eq!(out.messages[0].reasoning_content.as_deref(), Some("go"));
    }
}
