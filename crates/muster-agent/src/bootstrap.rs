//! Presence bootstrap protocol — the two-round barrier that brings every
//! node to full mutual acquaintance before the algorithm may start.
//!
//! Round one: every node announces itself and the coordinator releases
//! subscription traffic only once all are present, so nobody subscribes
//! against a peer that is not yet listening. Round two: every node reports
//! a fully mutual neighbour set and the coordinator releases the
//! algorithm, so nobody gossips into a half-connected topology.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast;

use muster_core::identity::AgentId;
use muster_core::wire::{control, Topic};

use crate::hub::{Endpoint, Inbox};
use crate::presence::{PresenceBook, SUBSCRIBE};

/// Protocol timings. Production values follow the original deployment;
/// tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapTimings {
    /// Node-side bounded receive while polling for coordinator releases.
    pub node_sync_timeout: Duration,
    /// Coordinator-side bounded receive while collecting readiness.
    pub coordinator_sync_timeout: Duration,
    /// Yield between subscription retry sweeps.
    pub subscribe_retry: Duration,
}

impl Default for BootstrapTimings {
    fn default() -> Self {
        Self {
            node_sync_timeout: Duration::from_secs(1),
            coordinator_sync_timeout: Duration::from_secs(3),
            subscribe_retry: Duration::from_secs(2),
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Available,
    Subscription,
    Wait,
}

/// Coordinator role: collects readiness across the two rounds and
/// broadcasts the release messages. Not Byzantine-tolerant — readiness is
/// a boolean per agent, so replays and duplicates are harmless.
pub struct Coordinator {
    endpoint: Endpoint,
    sync: Inbox,
    expected: Vec<AgentId>,
    timings: BootstrapTimings,
    shutdown: broadcast::Receiver<()>,
}

impl Coordinator {
    pub fn new(
        endpoint: Endpoint,
        sync: Inbox,
        expected: Vec<AgentId>,
        timings: BootstrapTimings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let expected = expected.iter().map(AgentId::bare).collect();
        Self {
            endpoint,
            sync,
            expected,
            timings,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut state = CoordinatorState::Available;
        loop {
            state = match state {
                CoordinatorState::Available => {
                    self.collect_and_release(control::READY_TO_SUBSCRIBE, control::START_TO_SUBSCRIBE)
                        .await?;
                    CoordinatorState::Subscription
                }
                CoordinatorState::Subscription => {
                    self.collect_and_release(control::READY_TO_START, control::START_ALGORITHM)
                        .await?;
                    CoordinatorState::Wait
                }
                CoordinatorState::Wait => {
                    self.wait().await;
                    return Ok(());
                }
            };
        }
    }

    /// One barrier round: poll for `ready_body` from every expected agent,
    /// then broadcast `release_body` to all of them.
    async fn collect_and_release(
        &mut self,
        ready_body: &'static str,
        release_body: &'static str,
    ) -> anyhow::Result<()> {
        // fresh readiness map per round
        let mut ready: HashMap<AgentId, bool> =
            self.expected.iter().map(|id| (id.clone(), false)).collect();

        while !ready.values().all(|r| *r) {
            let Some(msg) = self
                .sync
                .recv_timeout(self.timings.coordinator_sync_timeout)
                .await
            else {
                continue;
            };
            if msg.body.as_ref() != ready_body.as_bytes() {
                tracing::trace!(
                    coordinator = %self.endpoint.id(),
                    from = %msg.from,
                    "unexpected sync body, ignoring"
                );
                continue;
            }
            let sender = msg.from.bare();
            match ready.get_mut(&sender) {
                Some(flag) => {
                    *flag = true;
                    tracing::debug!(
                        coordinator = %self.endpoint.id(),
                        from = %sender,
                        body = ready_body,
                        pending = ready.values().filter(|r| !**r).count(),
                        "readiness recorded"
                    );
                }
                None => {
                    tracing::warn!(
                        coordinator = %self.endpoint.id(),
                        from = %sender,
                        "readiness from agent outside the coordinated set"
                    );
                }
            }
        }

        for agent in &self.expected {
            self.endpoint
                .send_control(agent, Topic::Sync, release_body)?;
        }
        tracing::info!(
            coordinator = %self.endpoint.id(),
            body = release_body,
            agents = self.expected.len(),
            "release broadcast sent"
        );
        Ok(())
    }

    /// Terminal idle hold: bounded sleep loop until shutdown.
    async fn wait(&mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(coordinator = %self.endpoint.id(), "coordinator shutting down");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }
}

// ── Node ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Available,
    Subscription,
}

/// Node role: announce availability, establish mutual acquaintance with
/// every configured neighbour, then hand control back so the agent can
/// attach its post-bootstrap tasks.
pub struct NodeBootstrap {
    endpoint: Endpoint,
    sync: Inbox,
    coordinator: AgentId,
    book: PresenceBook,
    timings: BootstrapTimings,
}

impl NodeBootstrap {
    pub fn new(
        endpoint: Endpoint,
        sync: Inbox,
        coordinator: AgentId,
        book: PresenceBook,
        timings: BootstrapTimings,
    ) -> Self {
        Self {
            endpoint,
            sync,
            coordinator,
            book,
            timings,
        }
    }

    /// Drive the FSM to completion. Returns the sync inbox so the caller
    /// can keep the channel alive for any late control traffic.
    pub async fn run(mut self) -> anyhow::Result<Inbox> {
        let mut state = NodeState::Available;
        loop {
            state = match state {
                NodeState::Available => self.run_available().await?,
                NodeState::Subscription => match self.run_subscription().await? {
                    Some(next) => next,
                    None => return Ok(self.sync),
                },
            };
        }
    }

    /// Announce once, then poll for the subscription release.
    async fn run_available(&mut self) -> anyhow::Result<NodeState> {
        self.endpoint
            .send_control(&self.coordinator, Topic::Sync, control::READY_TO_SUBSCRIBE)?;
        tracing::debug!(agent = %self.endpoint.id(), coordinator = %self.coordinator, "ready to subscribe sent");

        loop {
            let Some(msg) = self.sync.recv_timeout(self.timings.node_sync_timeout).await else {
                continue;
            };
            if msg.body.as_ref() == control::START_TO_SUBSCRIBE.as_bytes() {
                tracing::debug!(agent = %self.endpoint.id(), from = %msg.from, "start to subscribe received");
                return Ok(NodeState::Subscription);
            }
        }
    }

    /// Subscribe to every neighbour, retry the laggards, report readiness
    /// exactly once, and wait for the algorithm release.
    async fn run_subscription(&mut self) -> anyhow::Result<Option<NodeState>> {
        self.subscribe_all()?;
        let mut ready_sent = false;

        loop {
            if !ready_sent && self.book.fully_mutual() {
                ready_sent = true;
                self.endpoint
                    .send_control(&self.coordinator, Topic::Sync, control::READY_TO_START)?;
                tracing::info!(agent = %self.endpoint.id(), "fully mutual, ready to start sent");
            } else if !self.book.fully_mutual() {
                let laggards = self.book.non_mutual();
                tracing::debug!(
                    agent = %self.endpoint.id(),
                    laggards = laggards.len(),
                    "re-issuing subscription requests"
                );
                for neighbour in &laggards {
                    self.endpoint
                        .send_control(neighbour, Topic::Presence, SUBSCRIBE)?;
                    self.book.mark_pending(neighbour);
                }
                tokio::time::sleep(self.timings.subscribe_retry).await;
            }

            if let Some(msg) = self.sync.recv_timeout(self.timings.node_sync_timeout).await {
                if msg.body.as_ref() == control::START_ALGORITHM.as_bytes() {
                    tracing::info!(agent = %self.endpoint.id(), from = %msg.from, "start the algorithm received");
                    return Ok(None);
                }
            }
        }
    }

    fn subscribe_all(&self) -> anyhow::Result<()> {
        for neighbour in self.book.neighbours() {
            self.endpoint
                .send_control(&neighbour, Topic::Presence, SUBSCRIBE)?;
            self.book.mark_pending(&neighbour);
            tracing::debug!(agent = %self.endpoint.id(), neighbour = %neighbour, "subscription request sent");
        }
        Ok(())
    }
}
