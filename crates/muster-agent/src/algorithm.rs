//! The gossip learning state machine: Train → Send → Consensus, cycling
//! until the iteration cap.
//!
//! Each state is fallible in isolation. An error inside a state is logged
//! with the iteration it happened in and the state re-enters; it never
//! tears the agent down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use muster_core::consensus::{ConsensusEngine, ParameterBlock};
use muster_core::message::ConsensusTransmission;
use muster_core::wire::{new_conversation_id, ConversationId, Topic};

use crate::hub::Endpoint;
use crate::policy::{NeighbourSelection, ParameterAssignment};
use crate::presence::PresenceBook;
use crate::queue::PendingQueue;
use crate::receiver::Arrival;
use crate::similarity::SimilarityManager;
use crate::trainer::{ParameterStore, Trainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Train,
    Send,
    Consensus,
    Stopped,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Train => "train",
            State::Send => "send",
            State::Consensus => "consensus",
            State::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Knobs of one algorithm run.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmSettings {
    /// `None` runs until shutdown.
    pub max_iterations: Option<u64>,
    pub similarity_exchange: bool,
    /// How long Consensus waits for an inbound transmission before
    /// cycling back to Train.
    pub consensus_timeout: Duration,
    /// How long Send waits for similarity replies.
    pub similarity_wait: Duration,
}

pub struct AlgorithmMachine {
    endpoint: Endpoint,
    book: PresenceBook,
    trainer: Box<dyn Trainer>,
    params: ParameterStore,
    queue: PendingQueue,
    engine: ConsensusEngine,
    similarity: Arc<SimilarityManager>,
    selection: Box<dyn NeighbourSelection>,
    assignment: Box<dyn ParameterAssignment>,
    arrivals: mpsc::UnboundedReceiver<Arrival>,
    settings: AlgorithmSettings,
    iteration: u64,
    shutdown: broadcast::Receiver<()>,
}

impl AlgorithmMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: Endpoint,
        book: PresenceBook,
        trainer: Box<dyn Trainer>,
        params: ParameterStore,
        queue: PendingQueue,
        engine: ConsensusEngine,
        similarity: Arc<SimilarityManager>,
        selection: Box<dyn NeighbourSelection>,
        assignment: Box<dyn ParameterAssignment>,
        arrivals: mpsc::UnboundedReceiver<Arrival>,
        settings: AlgorithmSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            endpoint,
            book,
            trainer,
            params,
            queue,
            engine,
            similarity,
            selection,
            assignment,
            arrivals,
            settings,
            iteration: 0,
            shutdown,
        }
    }

    /// Drive the machine until the iteration cap or shutdown.
    pub async fn run(mut self) {
        let mut state = State::Train;
        loop {
            if self.shutdown_requested() {
                tracing::info!(agent = %self.endpoint.id(), iteration = self.iteration, "algorithm interrupted");
                return;
            }
            let next = match state {
                State::Train => self.run_train(),
                State::Send => self.run_send().await,
                State::Consensus => self.run_consensus().await,
                State::Stopped => {
                    tracing::info!(
                        agent = %self.endpoint.id(),
                        iterations = self.iteration,
                        "algorithm finished"
                    );
                    return;
                }
            };
            state = match next {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(
                        agent = %self.endpoint.id(),
                        iteration = self.iteration,
                        state = %state,
                        error = %e,
                        "state failed, re-entering"
                    );
                    state
                }
            };
        }
    }

    fn shutdown_requested(&mut self) -> bool {
        use broadcast::error::TryRecvError;
        !matches!(
            self.shutdown.try_recv(),
            Err(TryRecvError::Empty)
        )
    }

    // ── Train ────────────────────────────────────────────────────────────

    fn run_train(&mut self) -> anyhow::Result<State> {
        self.iteration += 1;
        if let Some(max) = self.settings.max_iterations {
            if self.iteration > max {
                self.iteration -= 1;
                return Ok(State::Stopped);
            }
        }
        tracing::info!(agent = %self.endpoint.id(), iteration = self.iteration, "training");

        let epochs = self.trainer.train();
        for (epoch, m) in epochs.iter().enumerate() {
            tracing::info!(
                target: "muster::metrics",
                agent = %self.endpoint.id(),
                iteration = self.iteration,
                epoch,
                accuracy = m.accuracy,
                loss = m.loss,
                seconds = m.elapsed_seconds(),
                "train epoch"
            );
        }
        let validation = self.trainer.validate();
        let test = self.trainer.test();
        tracing::info!(
            target: "muster::metrics",
            agent = %self.endpoint.id(),
            iteration = self.iteration,
            validation_accuracy = validation.accuracy,
            validation_loss = validation.loss,
            test_accuracy = test.accuracy,
            test_loss = test.loss,
            "evaluation"
        );

        // Publish the freshly trained parameters, then fold in whatever
        // arrived while training was running.
        self.params.replace(self.trainer.current_parameters());
        self.integrate_backlog()?;

        // The final iteration ends here; nothing follows the last Train.
        if let Some(max) = self.settings.max_iterations {
            if self.iteration >= max {
                return Ok(State::Stopped);
            }
        }
        Ok(State::Send)
    }

    // ── Send ─────────────────────────────────────────────────────────────

    async fn run_send(&mut self) -> anyhow::Result<State> {
        let available = self.book.available_neighbours();
        let selected = self.selection.select(&available);
        if selected.is_empty() {
            tracing::info!(
                agent = %self.endpoint.id(),
                iteration = self.iteration,
                available = available.len(),
                "no neighbour selected, skipping exchange"
            );
            return Ok(State::Train);
        }

        let (own_vector, neighbour_vectors) = if self.settings.similarity_exchange {
            self.exchange_similarity(&selected).await?
        } else {
            (None, HashMap::new())
        };

        let block = self.params.snapshot();
        let assigned = self.assignment.assign(
            &block,
            own_vector.as_ref(),
            &neighbour_vectors,
            &selected,
        );
        let conversation = new_conversation_id();
        let mut delivered = 0usize;
        for (neighbour, subset) in assigned {
            let tx =
                ConsensusTransmission::outbound(subset, self.endpoint.id().bare(), true);
            let body = tx.to_body();
            // a dead neighbour is an availability change, not a state error
            match self
                .endpoint
                .send(&neighbour, Topic::Layers, conversation, &body)
            {
                Ok(count) => {
                    delivered += 1;
                    tracing::info!(
                        target: "muster::messages",
                        agent = %self.endpoint.id(),
                        from = %self.endpoint.id(),
                        to = %neighbour,
                        kind = "SEND-LAYERS",
                        size = body.len(),
                        fragments = count,
                        conversation = %hex::encode(conversation),
                        "message sent"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        agent = %self.endpoint.id(),
                        neighbour = %neighbour,
                        error = %e,
                        "delivery failed, marking neighbour unavailable"
                    );
                    self.book.mark_unavailable(&neighbour);
                }
            }
        }
        if delivered == 0 {
            return Ok(State::Train);
        }
        Ok(State::Consensus)
    }

    async fn exchange_similarity(
        &mut self,
        selected: &[muster_core::identity::AgentId],
    ) -> anyhow::Result<(
        Option<muster_core::message::SimilarityVector>,
        HashMap<muster_core::identity::AgentId, muster_core::message::SimilarityVector>,
    )> {
        let conversation = new_conversation_id();
        // Registration precedes the sends so a fast reply cannot race it.
        self.similarity.register_outstanding(conversation, selected);
        let own = self.similarity.own_vector();
        let body = own.to_body();
        for neighbour in selected {
            if let Err(e) = self
                .endpoint
                .send(neighbour, Topic::Similarity, conversation, &body)
            {
                tracing::warn!(
                    agent = %self.endpoint.id(),
                    neighbour = %neighbour,
                    error = %e,
                    "similarity request failed, marking neighbour unavailable"
                );
                self.book.mark_unavailable(neighbour);
            }
        }
        let laggards = self
            .similarity
            .wait_for_replies(conversation, self.settings.similarity_wait)
            .await;
        if !laggards.is_empty() {
            tracing::warn!(
                agent = %self.endpoint.id(),
                iteration = self.iteration,
                laggards = laggards.len(),
                "similarity exchange incomplete, proceeding"
            );
        }
        let replies = self.similarity.replies(&conversation);
        self.similarity.forget(&conversation);
        Ok((Some(own), replies))
    }

    // ── Consensus ────────────────────────────────────────────────────────

    async fn run_consensus(&mut self) -> anyhow::Result<State> {
        loop {
            let arrival =
                tokio::time::timeout(self.settings.consensus_timeout, self.arrivals.recv())
                    .await;
            match arrival {
                Err(_) | Ok(None) => {
                    tracing::info!(
                        agent = %self.endpoint.id(),
                        iteration = self.iteration,
                        "no transmission within the consensus window"
                    );
                    self.integrate_backlog()?;
                    return Ok(State::Train);
                }
                Ok(Some(Arrival::Fragment)) => {
                    // partial payload; keep waiting for the rest
                    continue;
                }
                Ok(Some(Arrival::Complete {
                    sender,
                    conversation,
                    request_reply,
                    keys,
                })) => {
                    if request_reply {
                        self.reply_subset(&sender, conversation, &keys)?;
                    }
                    self.integrate_backlog()?;
                    return Ok(State::Train);
                }
            }
        }
    }

    /// Answer a request/reply exchange with our values for exactly the
    /// parameter names the peer shared, on the peer's conversation.
    fn reply_subset(
        &mut self,
        sender: &muster_core::identity::AgentId,
        conversation: ConversationId,
        keys: &[String],
    ) -> anyhow::Result<()> {
        let block = self.params.snapshot();
        let subset: ParameterBlock = keys
            .iter()
            .filter_map(|k| block.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        let tx = ConsensusTransmission::outbound(subset, self.endpoint.id().bare(), false);
        let body = tx.to_body();
        match self.endpoint.send(sender, Topic::Layers, conversation, &body) {
            Ok(_) => tracing::info!(
                target: "muster::messages",
                agent = %self.endpoint.id(),
                from = %self.endpoint.id(),
                to = %sender,
                kind = "SEND-LAYERS-REPLY",
                size = body.len(),
                conversation = %hex::encode(conversation),
                "message sent"
            ),
            Err(e) => {
                tracing::warn!(
                    agent = %self.endpoint.id(),
                    neighbour = %sender,
                    error = %e,
                    "reply delivery failed, marking neighbour unavailable"
                );
                self.book.mark_unavailable(sender);
            }
        }
        Ok(())
    }

    /// Drain the pending queue and fold everything into the live block.
    fn integrate_backlog(&mut self) -> anyhow::Result<()> {
        let pending = self.queue.drain_all();
        if pending.is_empty() {
            return Ok(());
        }
        let current = self.params.snapshot();
        let (merged, consumed) = self.engine.integrate(&current, pending)?;
        for tx in &consumed {
            tracing::info!(
                target: "muster::metrics",
                agent = %self.endpoint.id(),
                iteration = self.iteration,
                peer = %tx.sender,
                transit_secs = tx
                    .transit_time()
                    .and_then(|d| d.num_microseconds())
                    .unwrap_or(0) as f64
                    / 1e6,
                "transmission integrated"
            );
        }
        self.trainer.replace_parameters(merged.clone());
        self.params.replace(merged);
        tracing::info!(
            agent = %self.endpoint.id(),
            iteration = self.iteration,
            integrated = consumed.len(),
            "consensus applied"
        );
        Ok(())
    }
}
