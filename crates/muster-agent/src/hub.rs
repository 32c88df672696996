//! In-process message hub — per-agent, per-topic mailboxes with a hard
//! message-size ceiling.
//!
//! The hub stands in for the external message transport: delivery is
//! addressed, size-limited, and unordered across agents. Everything above
//! it (codec, payload formats, protocols) is transport-agnostic.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use muster_core::codec::{fragment, CodecError};
use muster_core::identity::AgentId;
use muster_core::wire::{ConversationId, Topic};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("recipient {0} is not registered with the hub")]
    UnknownRecipient(AgentId),

    #[error("recipient {0} has shut down its mailboxes")]
    RecipientGone(AgentId),

    #[error("message of {size} bytes exceeds the {max} byte ceiling")]
    TooLarge { size: usize, max: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// One addressed message in flight.
#[derive(Debug, Clone)]
pub struct WireMessage {
    pub from: AgentId,
    pub to: AgentId,
    pub topic: Topic,
    pub conversation: ConversationId,
    pub body: Bytes,
}

struct Mailboxes {
    sync: mpsc::UnboundedSender<WireMessage>,
    presence: mpsc::UnboundedSender<WireMessage>,
    layers: mpsc::UnboundedSender<WireMessage>,
    similarity: mpsc::UnboundedSender<WireMessage>,
}

impl Mailboxes {
    fn for_topic(&self, topic: Topic) -> &mpsc::UnboundedSender<WireMessage> {
        match topic {
            Topic::Sync => &self.sync,
            Topic::Presence => &self.presence,
            Topic::Layers => &self.layers,
            Topic::Similarity => &self.similarity,
        }
    }
}

/// The hub — shared by every agent in the process.
pub struct MessageHub {
    mailboxes: DashMap<AgentId, Mailboxes>,
    max_message_size: usize,
}

impl MessageHub {
    pub fn new(max_message_size: usize) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            max_message_size,
        })
    }

    /// Hard ceiling on one wire message, in bytes.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Register an agent, creating its mailboxes. Returns the send side
    /// (an [`Endpoint`]) and the receive side (one [`Inbox`] per topic).
    pub fn register(self: &Arc<Self>, id: AgentId) -> (Endpoint, AgentInboxes) {
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let (layers_tx, layers_rx) = mpsc::unbounded_channel();
        let (similarity_tx, similarity_rx) = mpsc::unbounded_channel();

        self.mailboxes.insert(
            id.bare(),
            Mailboxes {
                sync: sync_tx,
                presence: presence_tx,
                layers: layers_tx,
                similarity: similarity_tx,
            },
        );

        let endpoint = Endpoint {
            id,
            hub: Arc::clone(self),
        };
        let inboxes = AgentInboxes {
            sync: Inbox(sync_rx),
            presence: Inbox(presence_rx),
            layers: Inbox(layers_rx),
            similarity: Inbox(similarity_rx),
        };
        (endpoint, inboxes)
    }

    /// Deliver one wire message, enforcing the size ceiling.
    fn deliver(&self, msg: WireMessage) -> Result<(), TransportError> {
        if msg.body.len() > self.max_message_size {
            return Err(TransportError::TooLarge {
                size: msg.body.len(),
                max: self.max_message_size,
            });
        }
        let to = msg.to.bare();
        let boxes = self
            .mailboxes
            .get(&to)
            .ok_or_else(|| TransportError::UnknownRecipient(to.clone()))?;
        boxes
            .for_topic(msg.topic)
            .send(msg)
            .map_err(|_| TransportError::RecipientGone(to))
    }
}

// ── Send side ────────────────────────────────────────────────────────────────

/// An agent's sending handle. Cheap to clone; shared by the state machine
/// and the receiver tasks.
#[derive(Clone)]
pub struct Endpoint {
    id: AgentId,
    hub: Arc<MessageHub>,
}

impl Endpoint {
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Send a payload, fragmenting it if it exceeds the transport ceiling.
    /// Returns the number of wire messages emitted.
    pub fn send(
        &self,
        to: &AgentId,
        topic: Topic,
        conversation: ConversationId,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        let bodies = fragment(payload, conversation, self.hub.max_message_size)?;
        let count = bodies.len();
        for body in bodies {
            self.hub.deliver(WireMessage {
                from: self.id.bare(),
                to: to.bare(),
                topic,
                conversation,
                body,
            })?;
        }
        Ok(count)
    }

    /// Send a short control body (never fragmented).
    pub fn send_control(
        &self,
        to: &AgentId,
        topic: Topic,
        body: &'static str,
    ) -> Result<(), TransportError> {
        self.hub.deliver(WireMessage {
            from: self.id.bare(),
            to: to.bare(),
            topic,
            conversation: [0u8; 16],
            body: Bytes::from_static(body.as_bytes()),
        })
    }
}

// ── Receive side ─────────────────────────────────────────────────────────────

/// Single-topic receive queue. Owned by exactly one task.
pub struct Inbox(mpsc::UnboundedReceiver<WireMessage>);

impl Inbox {
    /// Bounded receive: `None` means no message within the timeout (or the
    /// hub dropped this agent). Never blocks indefinitely.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<WireMessage> {
        match tokio::time::timeout(timeout, self.0.recv()).await {
            Ok(msg) => msg,
            Err(_) => None,
        }
    }
}

/// The four per-topic inboxes created at registration.
pub struct AgentInboxes {
    pub sync: Inbox,
    pub presence: Inbox,
    pub layers: Inbox,
    pub similarity: Inbox,
}
