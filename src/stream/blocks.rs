use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::util::next_call_id;

/// Single-instance block kinds (tool blocks are tracked per slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Thinking,
    Text,
}

/// Kind-specific payload of a newly opened block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenedBlock {
    Thinking,
    Text,
    ToolUse { id: String, name: String },
}

/// A block lifecycle transition, the only trigger for lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Open { index: usize, block: OpenedBlock },
    Close { index: usize },
}

/// Where a tool argument fragment should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgsRoute {
    /// Slot is open: emit a delta against this block index.
    Emit(usize),
    /// Slot has no name yet: fragment held until the block opens.
    Buffered,
    /// Slot already closed: fragment discarded.
    Dropped,
}

pub type Transitions = SmallVec<[Transition; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThinkingState {
    Idle,
    Open(usize),
    Closed,
}

#[derive(Debug, Default)]
struct ToolSlot {
    block_index: Option<usize>,
    closed: bool,
    pending_args: String,
}

/// Open-block bookkeeping for one in-flight response.
///
/// Indices come from a strictly increasing counter assigned at first open
/// and are never reused. At most one thinking and one text block are open at
/// a time; thinking never reopens once closed; a tool slot binds to exactly
/// one block.
#[derive(Debug)]
pub struct BlockTracker {
    next_index: usize,
    thinking: ThinkingState,
    text: Option<usize>,
    slots: BTreeMap<u32, ToolSlot>,
}

impl BlockTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_index: 0,
            thinking: ThinkingState::Idle,
            text: None,
            slots: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_open(&self, kind: BlockKind) -> bool {
        match kind {
            BlockKind::Thinking => matches!(self.thinking, ThinkingState::Open(_)),
            BlockKind::Text => self.text.is_some(),
        }
    }

    /// `true` once a thinking block has been opened and closed.
    #[must_use]
    pub fn thinking_closed(&self) -> bool {
        self.thinking == ThinkingState::Closed
    }

    /// Open a thinking or text block unless one of that kind is already open.
    ///
    /// Opening text closes thinking first; opening thinking closes text first.
    /// Returns `None` when thinking is requested after it has been closed.
    pub fn open_if_needed(&mut self, kind: BlockKind, out: &mut Transitions) -> Option<usize> {
        match kind {
            BlockKind::Thinking => match self.thinking {
                ThinkingState::Open(index) => Some(index),
                ThinkingState::Closed => None,
                ThinkingState::Idle => {
                    self.close_if_open(BlockKind::Text, out);
                    let index = self.allocate();
                    self.thinking = ThinkingState::Open(index);
                    out.push(Transition::Open {
                        index,
                        block: OpenedBlock::Thinking,
                    });
                    Some(index)
                }
            },
            BlockKind::Text => {
                self.close_if_open(BlockKind::Thinking, out);
                if let Some(index) = self.text {
                    return Some(index);
                }
                let index = self.allocate();
                self.text = Some(index);
                out.push(Transition::Open {
                    index,
                    block: OpenedBlock::Text,
                });
                Some(index)
            }
        }
    }

    /// Close the block of `kind` if open; no-op otherwise.
    pub fn close_if_open(&mut self, kind: BlockKind, out: &mut Transitions) {
        match kind {
            BlockKind::Thinking => {
                if let ThinkingState::Open(index) = self.thinking {
                    self.thinking = ThinkingState::Closed;
                    out.push(Transition::Close { index });
                }
            }
            BlockKind::Text => {
                if let Some(index) = self.text.take() {
                    out.push(Transition::Close { index });
                }
            }
        }
    }

    /// Bind `slot` to a tool-use block on its first name-bearing fragment.
    ///
    /// Returns the block index and whether this call opened it. Repeated
    /// names for a bound slot are ignored. A missing or empty `id` gets a
    /// generated one.
    pub fn bind_tool_slot(
        &mut self,
        slot: u32,
        id: Option<&str>,
        name: &str,
        out: &mut Transitions,
    ) -> (usize, bool) {
        if let Some(index) = self.slots.get(&slot).and_then(|s| s.block_index) {
            return (index, false);
        }

        self.close_if_open(BlockKind::Thinking, out);
        self.close_if_open(BlockKind::Text, out);

        let index = self.allocate();
        self.slots.entry(slot).or_default().block_index = Some(index);
        let id = id
            .filter(|id| !id.is_empty())
            .map_or_else(next_call_id, str::to_string);
        out.push(Transition::Open {
            index,
            block: OpenedBlock::ToolUse {
                id,
                name: name.to_string(),
            },
        });
        (index, true)
    }

    /// Route an argument fragment for `slot`.
    pub fn route_tool_args(&mut self, slot: u32, args: &str) -> ArgsRoute {
        let state = self.slots.entry(slot).or_default();
        if state.closed {
            return ArgsRoute::Dropped;
        }
        match state.block_index {
            Some(index) => ArgsRoute::Emit(index),
            None => {
                state.pending_args.push_str(args);
                ArgsRoute::Buffered
            }
        }
    }

    /// Take arguments buffered for `slot` before its block opened.
    pub fn take_pending_args(&mut self, slot: u32) -> Option<String> {
        self.slots
            .get_mut(&slot)
            .map(|s| std::mem::take(&mut s.pending_args))
            .filter(|args| !args.is_empty())
    }

    /// Close every open tool block, in block-index order.
    pub fn close_tools(&mut self, out: &mut Transitions) {
        let mut open: SmallVec<[usize; 8]> = SmallVec::new();
        for slot in self.slots.values_mut() {
            if let Some(index) = slot.block_index {
                if !slot.closed {
                    slot.closed = true;
                    open.push(index);
                }
            }
        }
        open.sort_unstable();
        out.extend(open.into_iter().map(|index| Transition::Close { index }));
    }

    /// Close everything still open: thinking, then text, then tools.
    pub fn close_all(&mut self, out: &mut Transitions) {
        self.close_if_open(BlockKind::Thinking, out);
        self.close_if_open(BlockKind::Text, out);
        self.close_tools(out);
    }

    fn allocate(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

impl Default for BlockTracker {
    fn default() -> Self {
        Self::new()
    }
}
