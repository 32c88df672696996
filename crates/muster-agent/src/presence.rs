//! Presence book and acquaintance protocol — per-neighbour subscription
//! state and the receiver task that answers acquaintance traffic.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use muster_core::identity::AgentId;
use muster_core::wire::Topic;

use crate::hub::{Endpoint, Inbox};

/// Presence-topic bodies.
pub const SUBSCRIBE: &str = "subscribe";
pub const APPROVE: &str = "approve";

/// How far along mutual acquaintance with one neighbour is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquaintanceStatus {
    /// No subscription traffic exchanged yet.
    None,
    /// We have asked; the neighbour has not approved.
    Pending,
    /// Both sides subscribed. Required for every neighbour before the
    /// node may leave bootstrap.
    Mutual,
}

#[derive(Debug, Clone, Copy)]
struct NeighbourPresence {
    status: AcquaintanceStatus,
    available: bool,
}

/// Concurrent view of the neighbour set: acquaintance status plus an
/// availability annotation. The neighbour set itself is fixed at launch;
/// only the annotations change.
#[derive(Clone)]
pub struct PresenceBook {
    inner: Arc<DashMap<AgentId, NeighbourPresence>>,
}

impl PresenceBook {
    pub fn new(neighbours: &[AgentId]) -> Self {
        let inner = DashMap::new();
        for n in neighbours {
            inner.insert(
                n.bare(),
                NeighbourPresence {
                    status: AcquaintanceStatus::None,
                    available: false,
                },
            );
        }
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn status(&self, neighbour: &AgentId) -> AcquaintanceStatus {
        self.inner
            .get(&neighbour.bare())
            .map(|p| p.status)
            .unwrap_or(AcquaintanceStatus::None)
    }

    /// Record an outbound subscription request. Never downgrades Mutual.
    pub fn mark_pending(&self, neighbour: &AgentId) {
        if let Some(mut p) = self.inner.get_mut(&neighbour.bare()) {
            if p.status == AcquaintanceStatus::None {
                p.status = AcquaintanceStatus::Pending;
            }
        }
    }

    pub fn mark_mutual(&self, neighbour: &AgentId) {
        if let Some(mut p) = self.inner.get_mut(&neighbour.bare()) {
            p.status = AcquaintanceStatus::Mutual;
            p.available = true;
        }
    }

    pub fn mark_available(&self, neighbour: &AgentId) {
        if let Some(mut p) = self.inner.get_mut(&neighbour.bare()) {
            p.available = true;
        }
    }

    pub fn mark_unavailable(&self, neighbour: &AgentId) {
        if let Some(mut p) = self.inner.get_mut(&neighbour.bare()) {
            p.available = false;
        }
    }

    /// Every configured neighbour is mutually acquainted.
    pub fn fully_mutual(&self) -> bool {
        self.inner
            .iter()
            .all(|p| p.status == AcquaintanceStatus::Mutual)
    }

    /// Neighbours still short of mutual acquaintance.
    pub fn non_mutual(&self) -> Vec<AgentId> {
        let mut ids: Vec<_> = self
            .inner
            .iter()
            .filter(|p| p.status != AcquaintanceStatus::Mutual)
            .map(|p| p.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Neighbours eligible for gossip exchange right now.
    pub fn available_neighbours(&self) -> Vec<AgentId> {
        let mut ids: Vec<_> = self
            .inner
            .iter()
            .filter(|p| p.status == AcquaintanceStatus::Mutual && p.available)
            .map(|p| p.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn neighbours(&self) -> Vec<AgentId> {
        let mut ids: Vec<_> = self.inner.iter().map(|p| p.key().clone()).collect();
        ids.sort();
        ids
    }
}

// ── Receiver task ────────────────────────────────────────────────────────────

/// Cyclic task answering acquaintance traffic for one agent.
///
/// A `subscribe` is approved immediately and reciprocated if we have not
/// subscribed ourselves; an `approve` upgrades the sender to mutual.
/// Duplicate deliveries are idempotent. Runs until shutdown.
pub struct PresenceReceiver {
    endpoint: Endpoint,
    inbox: Inbox,
    book: PresenceBook,
    timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl PresenceReceiver {
    pub fn new(
        endpoint: Endpoint,
        inbox: Inbox,
        book: PresenceBook,
        timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            endpoint,
            inbox,
            book,
            timeout,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(agent = %self.endpoint.id(), "presence receiver shutting down");
                    return;
                }
                msg = self.inbox.recv_timeout(self.timeout) => {
                    let Some(msg) = msg else { continue };
                    self.handle(&msg);
                }
            }
        }
    }

    fn handle(&self, msg: &crate::hub::WireMessage) {
        let peer = msg.from.bare();
        match msg.body.as_ref() {
            b if b == SUBSCRIBE.as_bytes() => {
                tracing::debug!(agent = %self.endpoint.id(), peer = %peer, "subscription request, approving");
                if let Err(e) = self.endpoint.send_control(&peer, Topic::Presence, APPROVE) {
                    tracing::warn!(agent = %self.endpoint.id(), peer = %peer, error = %e, "approve failed");
                }
                self.book.mark_available(&peer);
                // reciprocate so acquaintance becomes mutual on both sides
                if self.book.status(&peer) == AcquaintanceStatus::None {
                    if let Err(e) = self.endpoint.send_control(&peer, Topic::Presence, SUBSCRIBE) {
                        tracing::warn!(agent = %self.endpoint.id(), peer = %peer, error = %e, "reciprocal subscribe failed");
                    }
                    self.book.mark_pending(&peer);
                }
            }
            b if b == APPROVE.as_bytes() => {
                tracing::debug!(agent = %self.endpoint.id(), peer = %peer, "subscription approved");
                self.book.mark_mutual(&peer);
            }
            other => {
                tracing::trace!(agent = %self.endpoint.id(), peer = %peer, body_len = other.len(), "unrecognised presence body, ignoring");
            }
        }
    }
}
