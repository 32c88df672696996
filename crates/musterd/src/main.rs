//! musterd — gossip learning swarm daemon.
//!
//! Launches one coordinator and N training agents over an in-process
//! message hub, wired in a ring, and runs the swarm until every agent
//! reaches its iteration cap or a shutdown signal lands.

use std::sync::Arc;

use anyhow::Result;

use muster_agent::{
    Agent, AgentSettings, BootstrapTimings, Coordinator, FullBlockAssignment, MessageHub,
    UniformRandomOne, UniformSimilarity,
};
use muster_core::config::MusterConfig;
use muster_core::identity::AgentId;

mod synthetic;
mod topology;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = MusterConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MusterConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MusterConfig::default()
    });
    tracing::info!(
        agents = config.swarm.agents,
        ring_degree = config.swarm.ring_degree,
        max_iterations = ?config.algorithm.max_iterations,
        similarity_exchange = config.algorithm.similarity_exchange,
        "musterd starting"
    );

    let hub = MessageHub::new(config.swarm.max_message_size);
    let agent_ids = topology::agent_ids(config.swarm.agents, &config.swarm.domain);
    let neighbour_sets = topology::ring(&agent_ids, config.swarm.ring_degree);
    let coordinator_id = AgentId::new("coordinator", config.swarm.domain.clone());

    // ── Shutdown channel ─────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(8);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Coordinator ──────────────────────────────────────────────────────
    let (coord_endpoint, coord_inboxes) = hub.register(coordinator_id.clone());
    let coordinator = Coordinator::new(
        coord_endpoint,
        coord_inboxes.sync,
        agent_ids.clone(),
        BootstrapTimings::default(),
        shutdown_tx.subscribe(),
    );
    let coordinator_task = tokio::spawn(async move {
        if let Err(e) = coordinator.run().await {
            tracing::error!(error = %e, "coordinator failed");
        }
    });

    // ── Agents ───────────────────────────────────────────────────────────
    let mut agent_tasks = Vec::with_capacity(agent_ids.len());
    for (i, (id, neighbours)) in agent_ids.iter().zip(neighbour_sets).enumerate() {
        let settings = AgentSettings::from_config(&config, coordinator_id.clone(), neighbours);
        let trainer = Box::new(synthetic::SyntheticTrainer::new(&config.training, i as u64));
        let agent = Agent::new(
            id.clone(),
            Arc::clone(&hub),
            settings,
            trainer,
            Box::new(UniformRandomOne),
            Box::new(FullBlockAssignment),
            Box::new(UniformSimilarity),
        );
        let shutdown = shutdown_tx.clone();
        let id = id.clone();
        agent_tasks.push(tokio::spawn(async move {
            if let Err(e) = agent.run(shutdown).await {
                tracing::error!(agent = %id, error = %e, "agent failed");
            }
        }));
    }

    // ── Wait for exit ────────────────────────────────────────────────────
    for task in agent_tasks {
        let _ = task.await;
    }
    tracing::info!("all agents finished");

    let _ = shutdown_tx.send(());
    let _ = coordinator_task.await;
    Ok(())
}
