use std::sync::Arc;
use std::time::Instant;

use crate::interceptor::MarkupInterceptor;
use crate::observability::log_request_complete;
use crate::observability::usage::{ScaledUsage, UsageAggregator};
use crate::protocol::anthropic::{
    AnthropicDelta, AnthropicMessageDeltaBody, AnthropicMessageStart, AnthropicStreamEvent,
    AnthropicUsage, ContentBlock,
};
use crate::protocol::mapping::{openai_finish_to_anthropic_stop, FINISH_TOOL_CALLS, STOP_END_TURN};
use crate::protocol::openai_chat::stream::{parse_openai_stream_data, OpenAiStreamData};
use crate::protocol::openai_chat::{OpenAiDelta, OpenAiStreamChunk, OpenAiStreamToolCall, OpenAiUsage};
use crate::stream::blocks::{ArgsRoute, BlockKind, BlockTracker, OpenedBlock, Transition, Transitions};

/// Whether the transcoder wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Continue,
    Finished,
}

struct RequestLog {
    backend: String,
    started: Instant,
}

/// Converts `OpenAI` chat stream chunks into Anthropic stream events.
///
/// One instance serves one response. Chunks must be fed in arrival order;
/// after a terminal reason (or [`StreamTranscoder::finish`]) further input is
/// ignored and the terminal `message_delta` + `message_stop` pair is emitted
/// exactly once.
pub struct StreamTranscoder {
    message_id: String,
    model: String,
    input_tokens: u64,
    blocks: BlockTracker,
    transitions: Transitions,
    interceptor: Option<Box<dyn MarkupInterceptor>>,
    usage: Option<OpenAiUsage>,
    aggregator: Arc<UsageAggregator>,
    request_log: Option<RequestLog>,
    started: bool,
    final_usage: Option<ScaledUsage>,
}

impl StreamTranscoder {
    /// `model` is the model name the client asked for; `input_tokens` is the
    /// local prompt estimate reported in `message_start`.
    #[must_use]
    pub fn new(
        message_id: String,
        model: String,
        input_tokens: u64,
        interceptor: Option<Box<dyn MarkupInterceptor>>,
        aggregator: Arc<UsageAggregator>,
    ) -> Self {
        Self {
            message_id,
            model,
            input_tokens,
            blocks: BlockTracker::new(),
            transitions: Transitions::new(),
            interceptor,
            usage: None,
            aggregator,
            request_log: None,
            started: false,
            final_usage: None,
        }
    }

    /// Log a `request completed` line at finalization.
    #[must_use]
    pub fn with_request_log(mut self, backend: impl Into<String>, started: Instant) -> Self {
        self.request_log = Some(RequestLog {
            backend: backend.into(),
            started,
        });
        self
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.final_usage.is_some()
    }

    /// Scaled usage recorded at finalization.
    #[must_use]
    pub fn final_usage(&self) -> Option<ScaledUsage> {
        self.final_usage
    }

    /// Emit `message_start`. Only the first call produces an event.
    pub fn start(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(AnthropicStreamEvent::MessageStart {
            message: AnthropicMessageStart {
                id: self.message_id.clone(),
                type_: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens: self.input_tokens,
                    output_tokens: 1,
                    cache_read_input_tokens: None,
                },
            },
        });
    }

    /// Process one `data:` payload.
    ///
    /// `[DONE]` finalizes with the default reason. A payload that is not
    /// valid JSON is skipped.
    pub fn process_data(&mut self, data: &str, out: &mut Vec<AnthropicStreamEvent>) -> ChunkOutcome {
        if self.is_finished() {
            return ChunkOutcome::Finished;
        }
        match parse_openai_stream_data(data) {
            Ok(OpenAiStreamData::Chunk(chunk)) => self.process_chunk(chunk, out),
            Ok(OpenAiStreamData::Done) => {
                self.finish(None, out);
                ChunkOutcome::Finished
            }
            Err(err) => {
                tracing::debug!(error = %err, payload_len = data.len(), "skipping malformed stream chunk");
                ChunkOutcome::Continue
            }
        }
    }

    /// Process one decoded chunk.
    pub fn process_chunk(
        &mut self,
        chunk: OpenAiStreamChunk,
        out: &mut Vec<AnthropicStreamEvent>,
    ) -> ChunkOutcome {
        if self.is_finished() {
            return ChunkOutcome::Finished;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return ChunkOutcome::Continue;
        };

        let mut delta = choice.delta;
        self.process_delta(&mut delta, out);

        match choice.finish_reason.as_deref() {
            Some(reason) if !reason.is_empty() => {
                if reason == FINISH_TOOL_CALLS {
                    self.blocks.close_tools(&mut self.transitions);
                    self.flush_transitions(out);
                }
                self.finish(Some(reason), out);
                ChunkOutcome::Finished
            }
            _ => ChunkOutcome::Continue,
        }
    }

    /// Close every open block and emit the terminal sequence.
    ///
    /// `None` means the backend never supplied a terminal reason; the
    /// response is finalized as `end_turn`. Calls after the first are no-ops.
    pub fn finish(&mut self, finish_reason: Option<&str>, out: &mut Vec<AnthropicStreamEvent>) {
        if self.is_finished() {
            return;
        }
        if finish_reason.is_none() {
            tracing::warn!(
                message_id = %self.message_id,
                "backend stream ended without a finish reason, finalizing as end_turn"
            );
        }

        self.blocks.close_all(&mut self.transitions);
        self.flush_transitions(out);

        let scaled = self.aggregator.record(self.usage.as_ref());
        self.final_usage = Some(scaled);

        let stop_reason = finish_reason.map_or(STOP_END_TURN, openai_finish_to_anthropic_stop);
        out.push(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: AnthropicUsage {
                input_tokens: scaled.input_tokens,
                output_tokens: scaled.output_tokens,
                cache_read_input_tokens: None,
            },
        });
        out.push(AnthropicStreamEvent::MessageStop {});

        if let Some(log) = &self.request_log {
            log_request_complete(&self.model, &log.backend, &scaled, log.started);
        }
    }

    fn process_delta(&mut self, delta: &mut OpenAiDelta, out: &mut Vec<AnthropicStreamEvent>) {
        if let Some(interceptor) = self.interceptor.as_mut() {
            interceptor.on_live_delta(delta);
        }

        if let Some(reasoning) = delta.reasoning_text() {
            self.on_reasoning(&reasoning, out);
        }
        if let Some(text) = delta.text() {
            self.on_text(text, out);
        }
        if let Some(tool_calls) = delta.tool_calls.take() {
            for tool_call in &tool_calls {
                self.on_tool_fragment(tool_call, out);
            }
        }
    }

    fn on_reasoning(&mut self, reasoning: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if self.blocks.thinking_closed() {
            tracing::debug!(
                len = reasoning.len(),
                "dropping reasoning that arrived after the thinking block closed"
            );
            return;
        }
        if !self.blocks.is_open(BlockKind::Thinking) && reasoning == "\n" {
            return;
        }
        let Some(index) = self
            .blocks
            .open_if_needed(BlockKind::Thinking, &mut self.transitions)
        else {
            return;
        };
        self.flush_transitions(out);
        out.push(AnthropicStreamEvent::ContentBlockDelta {
            index,
            delta: AnthropicDelta::ThinkingDelta {
                thinking: reasoning.to_string(),
            },
        });
    }

    fn on_text(&mut self, text: &str, out: &mut Vec<AnthropicStreamEvent>) {
        self.blocks
            .close_if_open(BlockKind::Thinking, &mut self.transitions);
        if !self.blocks.is_open(BlockKind::Text) && text == "\n" {
            self.flush_transitions(out);
            return;
        }
        let index = self.blocks.open_if_needed(BlockKind::Text, &mut self.transitions);
        self.flush_transitions(out);
        if let Some(index) = index {
            out.push(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicDelta::TextDelta {
                    text: text.to_string(),
                },
            });
        }
    }

    fn on_tool_fragment(
        &mut self,
        tool_call: &OpenAiStreamToolCall,
        out: &mut Vec<AnthropicStreamEvent>,
    ) {
        let slot = tool_call.index;
        if let Some(name) = tool_call.name() {
            let (index, opened) = self.blocks.bind_tool_slot(
                slot,
                tool_call.id.as_deref(),
                name,
                &mut self.transitions,
            );
            self.flush_transitions(out);
            if opened {
                if let Some(pending) = self.blocks.take_pending_args(slot) {
                    push_args_delta(index, pending, out);
                }
            }
        }

        let Some(arguments) = tool_call.arguments() else {
            return;
        };
        match self.blocks.route_tool_args(slot, arguments) {
            ArgsRoute::Emit(index) => push_args_delta(index, arguments.to_string(), out),
            ArgsRoute::Buffered => {
                tracing::debug!(slot, "buffering tool arguments until the call is named");
            }
            ArgsRoute::Dropped => {
                tracing::debug!(slot, "dropping tool arguments for a closed call");
            }
        }
    }

    fn flush_transitions(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        for transition in self.transitions.drain(..) {
            out.push(match transition {
                Transition::Open { index, block } => AnthropicStreamEvent::ContentBlockStart {
                    index,
                    content_block: match block {
                        OpenedBlock::Thinking => ContentBlock::Thinking {
                            thinking: String::new(),
                            signature: None,
                        },
                        OpenedBlock::Text => ContentBlock::text(""),
                        OpenedBlock::ToolUse { id, name } => ContentBlock::ToolUse {
                            id,
                            name,
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    },
                },
                Transition::Close { index } => AnthropicStreamEvent::ContentBlockStop { index },
            });
        }
    }
}

fn push_args_delta(index: usize, partial_json: String, out: &mut Vec<AnthropicStreamEvent>) {
    out.push(AnthropicStreamEvent::ContentBlockDelta {
        index,
        delta: AnthropicDelta::InputJsonDelta { partial_json },
    });
}
