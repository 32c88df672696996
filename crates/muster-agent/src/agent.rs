//! Agent assembly — wires one node's tasks together and drives its
//! lifecycle: presence receiver up, bootstrap to completion, data-plane
//! receivers up, algorithm to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use muster_core::config::MusterConfig;
use muster_core::consensus::ConsensusEngine;
use muster_core::identity::AgentId;

use crate::algorithm::{AlgorithmMachine, AlgorithmSettings};
use crate::bootstrap::{BootstrapTimings, NodeBootstrap};
use crate::hub::MessageHub;
use crate::policy::{NeighbourSelection, ParameterAssignment};
use crate::presence::{PresenceBook, PresenceReceiver};
use crate::queue::PendingQueue;
use crate::receiver::{LayerReceiver, SimilarityReceiver};
use crate::similarity::{SimilarityFunction, SimilarityManager};
use crate::trainer::{ParameterStore, Trainer};

/// Everything configurable about one node, resolved from the swarm
/// config plus this node's place in the topology.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub coordinator: AgentId,
    pub neighbours: Vec<AgentId>,
    pub max_order: u32,
    pub margin: f32,
    pub staleness_window: chrono::Duration,
    pub receiver_timeout: Duration,
    pub bootstrap: BootstrapTimings,
    pub algorithm: AlgorithmSettings,
}

impl AgentSettings {
    pub fn from_config(
        config: &MusterConfig,
        coordinator: AgentId,
        neighbours: Vec<AgentId>,
    ) -> Self {
        Self {
            coordinator,
            neighbours,
            max_order: config.consensus.max_order,
            margin: config.consensus.margin,
            staleness_window: chrono::Duration::milliseconds(
                (config.consensus.staleness_window_secs * 1e3) as i64,
            ),
            receiver_timeout: Duration::from_secs_f64(config.algorithm.receiver_timeout_secs),
            bootstrap: BootstrapTimings::default(),
            algorithm: AlgorithmSettings {
                max_iterations: config.algorithm.max_iterations,
                similarity_exchange: config.algorithm.similarity_exchange,
                consensus_timeout: Duration::from_secs_f64(
                    config.algorithm.consensus_timeout_secs,
                ),
                similarity_wait: Duration::from_secs_f64(
                    config.algorithm.similarity_wait_secs,
                ),
            },
        }
    }
}

/// One learning node. Construction registers it with the hub;
/// [`Agent::run`] owns its whole lifecycle.
pub struct Agent {
    id: AgentId,
    hub: Arc<MessageHub>,
    settings: AgentSettings,
    trainer: Box<dyn Trainer>,
    selection: Box<dyn NeighbourSelection>,
    assignment: Box<dyn ParameterAssignment>,
    similarity_fn: Box<dyn SimilarityFunction>,
}

impl Agent {
    pub fn new(
        id: AgentId,
        hub: Arc<MessageHub>,
        settings: AgentSettings,
        trainer: Box<dyn Trainer>,
        selection: Box<dyn NeighbourSelection>,
        assignment: Box<dyn ParameterAssignment>,
        similarity_fn: Box<dyn SimilarityFunction>,
    ) -> Self {
        Self {
            id: id.bare(),
            hub,
            settings,
            trainer,
            selection,
            assignment,
            similarity_fn,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Run the node to completion: bootstrap, then the algorithm loop.
    /// Auxiliary receiver tasks live exactly as long as this future.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        let (endpoint, inboxes) = self.hub.register(self.id.clone());
        let book = PresenceBook::new(&self.settings.neighbours);

        let presence = PresenceReceiver::new(
            endpoint.clone(),
            inboxes.presence,
            book.clone(),
            self.settings.receiver_timeout,
            shutdown.subscribe(),
        );
        let presence_task = tokio::spawn(presence.run());

        tracing::info!(agent = %self.id, coordinator = %self.settings.coordinator, "bootstrap starting");
        let bootstrap = NodeBootstrap::new(
            endpoint.clone(),
            inboxes.sync,
            self.settings.coordinator.clone(),
            book.clone(),
            self.settings.bootstrap,
        );
        // keep the sync inbox alive until the agent winds down
        let _sync = bootstrap.run().await?;
        tracing::info!(agent = %self.id, "bootstrap complete");

        let params = ParameterStore::new(self.trainer.current_parameters());
        let similarity = Arc::new(SimilarityManager::new(
            self.id.clone(),
            self.similarity_fn,
            params.clone(),
        ));
        let queue = PendingQueue::new();
        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();

        let layers = LayerReceiver::new(
            self.id.clone(),
            inboxes.layers,
            queue.clone(),
            arrivals_tx,
            self.settings.staleness_window,
            self.settings.receiver_timeout,
            shutdown.subscribe(),
        );
        let layers_task = tokio::spawn(layers.run());

        let sim_receiver = SimilarityReceiver::new(
            endpoint.clone(),
            inboxes.similarity,
            Arc::clone(&similarity),
            self.settings.receiver_timeout,
            shutdown.subscribe(),
        );
        let similarity_task = tokio::spawn(sim_receiver.run());

        let engine = ConsensusEngine::new(self.settings.max_order, self.settings.margin)?;
        let machine = AlgorithmMachine::new(
            endpoint,
            book,
            self.trainer,
            params,
            queue,
            engine,
            similarity,
            self.selection,
            self.assignment,
            arrivals_rx,
            self.settings.algorithm,
            shutdown.subscribe(),
        );
        machine.run().await;

        presence_task.abort();
        layers_task.abort();
        similarity_task.abort();
        tracing::info!(agent = %self.id, "agent finished");
        Ok(())
    }
}
