use std::borrow::Cow;

use crate::interceptor::lexer::{strip_tool_call_markup, ParsedToolCall, TagLexer};
use crate::interceptor::{InterceptorFactory, MarkupInterceptor, SYNTHETIC_SLOT_BASE};
use crate::protocol::anthropic::{AnthropicMessage, ContentBlock, MessageContent};
use crate::protocol::openai_chat::{OpenAiDelta, OpenAiStreamToolCall, OpenAiStreamToolCallFunction};
use crate::util::next_call_id;

const ZHIPU_HOST: &str = "open.bigmodel.cn";

/// Factory for GLM backends on `open.bigmodel.cn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZhipuInterceptorFactory;

impl InterceptorFactory for ZhipuInterceptorFactory {
    fn name(&self) -> &'static str {
        "zhipu"
    }

    fn should_intercept(&self, backend_url: &str) -> bool {
        backend_url.contains(ZHIPU_HOST)
    }

    fn create(&self) -> Box<dyn MarkupInterceptor> {
        Box::new(ZhipuInterceptor::new())
    }
}

/// Extracts `<tool_call>` markup that GLM models write into their reasoning.
#[derive(Debug, Default)]
pub struct ZhipuInterceptor {
    lexer: TagLexer,
    next_slot: u32,
}

impl ZhipuInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn synthesize(&mut self, call: ParsedToolCall) -> OpenAiStreamToolCall {
        let index = SYNTHETIC_SLOT_BASE.saturating_add(self.next_slot);
        self.next_slot = self.next_slot.saturating_add(1);
        let arguments = serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string());
        let id = next_call_id();
        tracing::info!(
            call_id = %id,
            name = %call.name,
            arguments = %arguments,
            "parsed tool_call markup from reasoning"
        );
        OpenAiStreamToolCall {
            index,
            id: Some(id),
            type_: Some("function".to_string()),
            function: Some(OpenAiStreamToolCallFunction {
                name: Some(call.name),
                arguments: Some(arguments),
            }),
        }
    }
}

impl MarkupInterceptor for ZhipuInterceptor {
    fn on_historical_message(&mut self, message: &mut AnthropicMessage) {
        if !message.is_assistant() {
            return;
        }
        let MessageContent::Blocks(blocks) = &mut message.content else {
            return;
        };
        for block in blocks {
            let ContentBlock::Thinking { thinking, .. } = block else {
                continue;
            };
            let stripped = match strip_tool_call_markup(thinking) {
                Cow::Borrowed(_) => continue,
                Cow::Owned(stripped) => stripped,
            };
            *thinking = stripped;
        }
    }

    fn on_live_delta(&mut self, delta: &mut OpenAiDelta) {
        let mut parsed = Vec::new();
        {
            let Some(reasoning) = delta.reasoning_text() else {
                return;
            };
            self.lexer.feed(&reasoning, &mut parsed);
        }
        if parsed.is_empty() {
            return;
        }
        let synthesized: Vec<OpenAiStreamToolCall> =
            parsed.into_iter().map(|call| self.synthesize(call)).collect();
        delta
            .tool_calls
            .get_or_insert_with(Vec::new)
            .extend(synthesized);
    }
}
