//! Muster wire format — fragment header, topics, and control bodies.
//!
//! Structured bodies (parameter transmissions, similarity vectors) are JSON
//! and defined in `message`. This module owns everything with a fixed
//! binary layout plus the reserved topic and control-body strings of the
//! bootstrap protocol.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Topics ───────────────────────────────────────────────────────────────────

/// Logical channel a message is addressed to. Each agent keeps one mailbox
/// per topic; receiver tasks consume exactly one topic each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Reserved coordination channel for the bootstrap barrier.
    Sync,
    /// Acquaintance (subscribe/approve) traffic.
    Presence,
    /// Parameter-block transmissions.
    Layers,
    /// Similarity-vector exchange.
    Similarity,
}

/// Control bodies exchanged on [`Topic::Sync`]. Plain text, matched
/// byte-for-byte.
pub mod control {
    pub const READY_TO_SUBSCRIBE: &str = "ready to subscribe";
    pub const START_TO_SUBSCRIBE: &str = "start to subscribe";
    pub const READY_TO_START: &str = "ready to start";
    pub const START_ALGORITHM: &str = "start the algorithm";
}

// ── Conversation ids ─────────────────────────────────────────────────────────

/// Correlation id grouping the fragments of one logical payload, or the
/// request/reply pair of one exchange round.
pub type ConversationId = [u8; 16];

/// Fresh random conversation id.
pub fn new_conversation_id() -> ConversationId {
    rand::random()
}

// ── Fragment header ──────────────────────────────────────────────────────────

/// Marker bytes opening every fragment. Payload bodies are JSON or plain
/// text and can never begin with this sequence.
pub const FRAGMENT_MAGIC: [u8; 4] = [0xF7, b'M', b'F', 0x01];

/// Header embedded ahead of the raw chunk bytes of every fragment.
///
/// Wire size: 28 bytes. The codec computes the maximum chunk payload as
/// `max_size - HEADER_LEN`, so this size is part of the protocol.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FragmentHeader {
    /// Always [`FRAGMENT_MAGIC`].
    pub magic: [u8; 4],
    /// Conversation id shared by every fragment of one payload.
    pub conversation: ConversationId,
    /// Zero-based position of this chunk.
    pub index: u32,
    /// Total number of chunks in the conversation.
    pub total: u32,
}

// Compile-time guard: HEADER_LEN is quoted in the codec math.
assert_eq_size!(FragmentHeader, [u8; 28]);

/// Fixed per-fragment overhead in bytes.
pub const HEADER_LEN: usize = 28;

impl FragmentHeader {
    pub fn new(conversation: ConversationId, index: u32, total: u32) -> Self {
        Self {
            magic: FRAGMENT_MAGIC,
            conversation,
            index,
            total,
        }
    }
}

/// Does this wire body carry a fragment header?
pub fn is_fragment(body: &[u8]) -> bool {
    body.len() >= HEADER_LEN && body[..4] == FRAGMENT_MAGIC
}
