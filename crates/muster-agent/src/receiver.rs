//! Cyclic receiver tasks — one per inbound topic, running alongside the
//! algorithm state machine.
//!
//! The layer receiver is the sole producer of the pending queue; the
//! similarity receiver is the sole writer of reply slots in the
//! similarity manager. Both assemble multipart payloads, enforce the
//! timestamp rules, and never crash the agent: a bad message is logged
//! and dropped, per the swallow-and-continue policy for protocol steps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use muster_core::codec::Assembler;
use muster_core::consensus::{check_staleness, Staleness};
use muster_core::identity::AgentId;
use muster_core::message::{ConsensusTransmission, ProtocolError, SimilarityVector};
use muster_core::wire::{ConversationId, Topic};

use crate::hub::{Endpoint, Inbox, WireMessage};
use crate::queue::PendingQueue;
use crate::similarity::SimilarityManager;

/// Notice from the layer receiver to the waiting Consensus state.
#[derive(Debug, Clone)]
pub enum Arrival {
    /// A fragment was stored but its conversation is still incomplete.
    Fragment,
    /// A transmission was fully assembled and enqueued.
    Complete {
        sender: AgentId,
        conversation: ConversationId,
        request_reply: bool,
        /// Parameter names the sender shared — a reply returns this subset.
        keys: Vec<String>,
    },
}

// ── Layer receiver ───────────────────────────────────────────────────────────

pub struct LayerReceiver {
    id: AgentId,
    inbox: Inbox,
    assembler: Assembler,
    queue: PendingQueue,
    arrivals: mpsc::UnboundedSender<Arrival>,
    staleness_window: chrono::Duration,
    timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl LayerReceiver {
    pub fn new(
        id: AgentId,
        inbox: Inbox,
        queue: PendingQueue,
        arrivals: mpsc::UnboundedSender<Arrival>,
        staleness_window: chrono::Duration,
        timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            inbox,
            assembler: Assembler::new(),
            queue,
            arrivals,
            staleness_window,
            timeout,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(agent = %self.id, "layer receiver shutting down");
                    return;
                }
                msg = self.inbox.recv_timeout(self.timeout) => {
                    let Some(msg) = msg else { continue };
                    self.handle(msg);
                }
            }
        }
    }

    fn handle(&mut self, msg: WireMessage) {
        let sender = msg.from.bare();
        let Some(payload) = self.assembler.assemble(&sender, &msg.body) else {
            tracing::debug!(
                agent = %self.id,
                peer = %sender,
                conversation = %hex::encode(msg.conversation),
                "fragment stored, conversation incomplete"
            );
            let _ = self.arrivals.send(Arrival::Fragment);
            return;
        };

        tracing::info!(
            target: "muster::messages",
            agent = %self.id,
            from = %sender,
            to = %self.id,
            kind = "RECV-LAYERS",
            size = payload.len(),
            conversation = %hex::encode(msg.conversation),
            "message received"
        );

        let tx = match ConsensusTransmission::from_body(sender.clone(), &payload) {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(agent = %self.id, peer = %sender, error = %e, "malformed transmission dropped");
                return;
            }
        };

        match check_staleness(&tx, self.staleness_window) {
            Ok(Staleness::Fresh(elapsed)) => {
                tracing::info!(
                    agent = %self.id,
                    peer = %sender,
                    elapsed_secs = elapsed.num_milliseconds() as f64 / 1e3,
                    "transmission accepted"
                );
                let keys = tx.payload.keys().cloned().collect();
                let request_reply = tx.request_reply;
                self.queue.push(tx);
                let _ = self.arrivals.send(Arrival::Complete {
                    sender,
                    conversation: msg.conversation,
                    request_reply,
                    keys,
                });
            }
            Ok(Staleness::Stale(elapsed)) => {
                tracing::info!(
                    agent = %self.id,
                    peer = %sender,
                    elapsed_secs = elapsed.num_milliseconds() as f64 / 1e3,
                    window_secs = self.staleness_window.num_milliseconds() as f64 / 1e3,
                    "stale transmission discarded"
                );
            }
            Err(e @ ProtocolError::MissingTimestamp(_)) => {
                // protocol violation by the sender; fatal for this message
                tracing::error!(agent = %self.id, peer = %sender, error = %e, "transmission without send timestamp");
            }
            Err(e) => {
                tracing::error!(agent = %self.id, peer = %sender, error = %e, "transmission rejected");
            }
        }
    }
}

// ── Similarity receiver ──────────────────────────────────────────────────────

pub struct SimilarityReceiver {
    endpoint: Endpoint,
    inbox: Inbox,
    assembler: Assembler,
    manager: Arc<SimilarityManager>,
    timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl SimilarityReceiver {
    pub fn new(
        endpoint: Endpoint,
        inbox: Inbox,
        manager: Arc<SimilarityManager>,
        timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            endpoint,
            inbox,
            assembler: Assembler::new(),
            manager,
            timeout,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(agent = %self.endpoint.id(), "similarity receiver shutting down");
                    return;
                }
                msg = self.inbox.recv_timeout(self.timeout) => {
                    let Some(msg) = msg else { continue };
                    self.handle(msg);
                }
            }
        }
    }

    fn handle(&mut self, msg: WireMessage) {
        let sender = msg.from.bare();
        let Some(payload) = self.assembler.assemble(&sender, &msg.body) else {
            return;
        };

        let vector = match SimilarityVector::from_body(sender.clone(), &payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(agent = %self.endpoint.id(), peer = %sender, error = %e, "malformed similarity vector dropped");
                return;
            }
        };
        if vector.sent_at.is_none() {
            tracing::error!(agent = %self.endpoint.id(), peer = %sender, "similarity vector without send timestamp");
            return;
        }

        if self.manager.record_reply(msg.conversation, vector) {
            tracing::debug!(
                agent = %self.endpoint.id(),
                peer = %sender,
                conversation = %hex::encode(msg.conversation),
                "similarity reply recorded"
            );
            return;
        }

        // Not a conversation we initiated: the peer is asking for our
        // vector. Answer on the same conversation id.
        let own = self.manager.own_vector();
        match self
            .endpoint
            .send(&sender, Topic::Similarity, msg.conversation, &own.to_body())
        {
            Ok(_) => tracing::debug!(
                agent = %self.endpoint.id(),
                peer = %sender,
                conversation = %hex::encode(msg.conversation),
                "similarity vector answered"
            ),
            Err(e) => tracing::warn!(
                agent = %self.endpoint.id(),
                peer = %sender,
                error = %e,
                "similarity answer failed"
            ),
        }
    }
}
