//! Multipart codec — splits oversized payloads into fragments and
//! reassembles fragments delivered in any order.
//!
//! The codec never performs I/O. `fragment` produces ready-to-send wire
//! bodies; `Assembler::assemble` consumes received bodies and yields the
//! original payload exactly once per conversation.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use bytes::Bytes;
use zerocopy::{AsBytes, FromBytes};

use crate::identity::AgentId;
use crate::wire::{is_fragment, ConversationId, FragmentHeader, HEADER_LEN};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("message ceiling {max_size} does not fit the {HEADER_LEN}-byte fragment header")]
    CeilingTooSmall { max_size: usize },
}

// ── Fragmentation ────────────────────────────────────────────────────────────

/// Split `payload` into wire bodies no larger than `max_size`.
///
/// A payload that fits in one message alongside the header overhead is
/// emitted as a single non-fragment body, byte-identical to the payload.
/// Anything larger is split into `ceil(len / (max_size - HEADER_LEN))`
/// chunks, each prefixed with a [`FragmentHeader`] carrying `conversation`.
pub fn fragment(
    payload: &[u8],
    conversation: ConversationId,
    max_size: usize,
) -> Result<Vec<Bytes>, CodecError> {
    if max_size <= HEADER_LEN {
        return Err(CodecError::CeilingTooSmall { max_size });
    }

    if payload.len() + HEADER_LEN <= max_size {
        return Ok(vec![Bytes::copy_from_slice(payload)]);
    }

    let capacity = max_size - HEADER_LEN;
    let total = payload.len().div_ceil(capacity) as u32;

    let mut messages = Vec::with_capacity(total as usize);
    for (index, chunk) in payload.chunks(capacity).enumerate() {
        let header = FragmentHeader::new(conversation, index as u32, total);
        let mut body = Vec::with_capacity(HEADER_LEN + chunk.len());
        body.extend_from_slice(header.as_bytes());
        body.extend_from_slice(chunk);
        messages.push(Bytes::from(body));
    }
    Ok(messages)
}

// ── Reassembly ───────────────────────────────────────────────────────────────

/// In-progress conversation: declared chunk count plus the chunks seen so
/// far, keyed by index so delivery order does not matter.
#[derive(Debug)]
struct FragmentBuffer {
    total: u32,
    chunks: BTreeMap<u32, Bytes>,
}

/// How many finished conversations the assembler remembers for late-chunk
/// suppression. Conversation ids are random, so a straggler older than the
/// last [`COMPLETED_CAPACITY`] payloads starts a fresh buffer that can
/// never complete rather than resurrecting the old one.
const COMPLETED_CAPACITY: usize = 1024;

/// Reassembles fragments into payloads, one buffer per (sender,
/// conversation) pair.
///
/// Not shared across tasks: each receiver task owns its own assembler.
#[derive(Debug, Default)]
pub struct Assembler {
    buffers: HashMap<(AgentId, ConversationId), FragmentBuffer>,
    completed: HashSet<(AgentId, ConversationId)>,
    completed_order: VecDeque<(AgentId, ConversationId)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received wire body. Returns the full payload when `body`
    /// completes a conversation (or is a non-fragment message), `None`
    /// while the conversation is still assembling.
    ///
    /// Duplicate chunks overwrite idempotently; chunks for an already
    /// completed conversation are ignored; malformed headers are dropped.
    pub fn assemble(&mut self, sender: &AgentId, body: &Bytes) -> Option<Bytes> {
        if !is_fragment(body) {
            return Some(body.clone());
        }

        let header = FragmentHeader::read_from(&body[..HEADER_LEN])?;
        let conversation = header.conversation;
        let total = header.total;
        let index = header.index;
        if total == 0 || index >= total {
            return None;
        }

        let key = (sender.bare(), conversation);
        if self.completed.contains(&key) {
            return None;
        }

        let buffer = self.buffers.entry(key.clone()).or_insert(FragmentBuffer {
            total,
            chunks: BTreeMap::new(),
        });
        if buffer.total != total {
            // Sender disagrees with its own earlier declaration. Drop.
            return None;
        }
        buffer.chunks.insert(index, body.slice(HEADER_LEN..));

        if buffer.chunks.len() as u32 == buffer.total {
            if let Some(done) = self.buffers.remove(&key) {
                self.mark_completed(key);
                let mut payload = Vec::new();
                for chunk in done.chunks.values() {
                    payload.extend_from_slice(chunk);
                }
                return Some(Bytes::from(payload));
            }
        }
        None
    }

    /// Remember `key` as completed, evicting the oldest marker once the
    /// ring is full so the set stays bounded on long-running agents.
    fn mark_completed(&mut self, key: (AgentId, ConversationId)) {
        if self.completed.len() >= COMPLETED_CAPACITY {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
        self.completed_order.push_back(key.clone());
        self.completed.insert(key);
    }

    /// Is `body` a fragment of a conversation this assembler has not yet
    /// completed?
    pub fn is_incomplete_fragment(&self, sender: &AgentId, body: &Bytes) -> bool {
        if !is_fragment(body) {
            return false;
        }
        match FragmentHeader::read_from(&body[..HEADER_LEN]) {
            Some(header) => !self
                .completed
                .contains(&(sender.bare(), header.conversation)),
            None => false,
        }
    }

    /// Number of conversations still assembling.
    pub fn pending_conversations(&self) -> usize {
        self.buffers.len()
    }
}
