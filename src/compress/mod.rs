//! Conversation window compression.
//!
//! Long agent sessions resend the whole history on every request. Turns that
//! fall outside the retained window keep their text but lose thinking blocks,
//! and their tool traffic is reduced to fixed placeholders. Everything here is
//! pure: turns in, turns and counters out.
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::protocol::anthropic::{AnthropicMessage, ContentBlock, MessageContent};

/// Content of a compressed `tool_result` block.
pub const COMPRESSED_TOOL_RESULT: &str = "[compressed]";

/// Text that replaces an image outside the vision window.
pub const IMAGE_OMITTED: &str = "[image omitted]";

/// Counters for one compression pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionStats {
    pub thinking_blocks: usize,
    pub tool_calls: usize,
    pub tool_results: usize,
    pub images: usize,
}

impl CompressionStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Input of a compressed `tool_use` block: `{"compressed":true}`.
#[must_use]
pub fn compressed_tool_input() -> Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert("compressed".to_string(), Value::Bool(true));
    Value::Object(map)
}

fn is_compressed_tool_input(input: &Value) -> bool {
    input
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get("compressed") == Some(&Value::Bool(true)))
}

fn is_compressed_tool_result(content: &Value) -> bool {
    content.as_str() == Some(COMPRESSED_TOOL_RESULT)
}

/// A user turn that does not merely carry tool results starts a new round.
#[inline]
#[must_use]
pub fn is_round_boundary(turn: &AnthropicMessage) -> bool {
    turn.is_user() && !turn.has_tool_result()
}

/// Index of the `keep_rounds`-th round boundary counted from the end.
///
/// Turns before the returned index fall outside the window. Returns 0 when
/// `keep_rounds` is 0 or the history holds fewer rounds.
#[must_use]
pub fn compress_boundary(turns: &[AnthropicMessage], keep_rounds: usize) -> usize {
    if keep_rounds == 0 {
        return 0;
    }
    let mut rounds = 0usize;
    for (index, turn) in turns.iter().enumerate().rev() {
        if is_round_boundary(turn) {
            rounds += 1;
            if rounds == keep_rounds {
                return index;
            }
        }
    }
    0
}

/// Compress every turn outside the last `keep_rounds` rounds.
///
/// See [`compress_history_owned`].
#[must_use]
pub fn compress_history(
    turns: &[AnthropicMessage],
    keep_rounds: usize,
) -> (Vec<AnthropicMessage>, CompressionStats) {
    compress_history_owned(turns.to_vec(), keep_rounds)
}

/// Same as [`compress_history`], but consumes the turns so retained ones move
/// through without cloning.
///
/// Within a compressed turn: thinking blocks are dropped, `tool_use` input
/// becomes `{"compressed":true}`, `tool_result` content becomes
/// `"[compressed]"`, and repeated call ids keep only their first block. Text
/// and images are left alone. Running the pass twice changes nothing and
/// reports zero counts the second time.
#[must_use]
pub fn compress_history_owned(
    mut turns: Vec<AnthropicMessage>,
    keep_rounds: usize,
) -> (Vec<AnthropicMessage>, CompressionStats) {
    let boundary = compress_boundary(&turns, keep_rounds);
    let mut stats = CompressionStats::default();
    for turn in &mut turns[..boundary] {
        compress_turn(turn, &mut stats);
    }
    (turns, stats)
}

fn compress_turn(turn: &mut AnthropicMessage, stats: &mut CompressionStats) {
    let MessageContent::Blocks(blocks) = &mut turn.content else {
        return;
    };
    let mut seen_calls: FxHashSet<String> = FxHashSet::default();
    let mut seen_results: FxHashSet<String> = FxHashSet::default();

    blocks.retain_mut(|block| match block {
        ContentBlock::Thinking { .. } => {
            stats.thinking_blocks += 1;
            false
        }
        ContentBlock::ToolUse { id, input, .. } => {
            if !seen_calls.insert(id.clone()) {
                return false;
            }
            if !is_compressed_tool_input(input) {
                *input = compressed_tool_input();
                stats.tool_calls += 1;
            }
            true
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => {
            if !seen_results.insert(tool_use_id.clone()) {
                return false;
            }
            if !is_compressed_tool_result(content) {
                *content = Value::String(COMPRESSED_TOOL_RESULT.to_string());
                stats.tool_results += 1;
            }
            true
        }
        ContentBlock::Text { .. } | ContentBlock::Image { .. } | ContentBlock::Other => true,
    });
}

/// Replace images older than the last `vision_rounds` rounds with a short
/// text marker. Returns the number of images replaced.
#[must_use]
pub fn strip_stale_images(
    mut turns: Vec<AnthropicMessage>,
    vision_rounds: usize,
) -> (Vec<AnthropicMessage>, usize) {
    let boundary = compress_boundary(&turns, vision_rounds);
    let mut removed = 0usize;
    for turn in &mut turns[..boundary] {
        let MessageContent::Blocks(blocks) = &mut turn.content else {
            continue;
        };
        for block in blocks.iter_mut() {
            if matches!(block, ContentBlock::Image { .. }) {
                *block = ContentBlock::text(IMAGE_OMITTED);
                removed += 1;
            }
        }
    }
    (turns, removed)
}

/// Drop every turn before the last `rounds` rounds.
///
/// The cut always lands on a round boundary. With fewer rounds than
/// requested, or `rounds == 0`, nothing is dropped.
#[must_use]
pub fn trim_to_rounds(mut turns: Vec<AnthropicMessage>, rounds: usize) -> Vec<AnthropicMessage> {
    let boundary = compress_boundary(&turns, rounds);
    if boundary > 0 {
        turns.drain(..boundary);
    }
    turns
}

/// Whether any turn still carries an image block.
#[must_use]
pub fn history_has_image(turns: &[AnthropicMessage]) -> bool {
    turns.iter().any(AnthropicMessage::has_image)
}
