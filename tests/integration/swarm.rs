//! Full swarm lifecycle: coordinator plus agents, bootstrap through
//! algorithm completion, over one hub.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use muster_agent::{
    Agent, AgentSettings, AlgorithmSettings, Coordinator, FullBlockAssignment, MessageHub,
    UniformRandomOne, UniformSimilarity,
};
use muster_core::identity::AgentId;

use crate::{fast_timings, id, StubTrainer};

fn settings(coordinator: AgentId, neighbours: Vec<AgentId>, iterations: u64) -> AgentSettings {
    AgentSettings {
        coordinator,
        neighbours,
        max_order: 4,
        margin: 0.05,
        staleness_window: chrono::Duration::seconds(60),
        receiver_timeout: Duration::from_millis(20),
        bootstrap: fast_timings(),
        algorithm: AlgorithmSettings {
            max_iterations: Some(iterations),
            similarity_exchange: false,
            consensus_timeout: Duration::from_millis(100),
            similarity_wait: Duration::from_millis(100),
        },
    }
}

#[tokio::test]
async fn three_agents_run_to_their_iteration_cap() {
    let hub = MessageHub::new(64 * 1024);
    let coordinator_id = id("coordinator@swarm");
    let agents: Vec<AgentId> = vec![id("a@swarm"), id("b@swarm"), id("c@swarm")];
    let iterations = 3;

    let (shutdown_tx, _) = broadcast::channel(8);

    let (coord_ep, coord_in) = hub.register(coordinator_id.clone());
    let coordinator = Coordinator::new(
        coord_ep,
        coord_in.sync,
        agents.clone(),
        fast_timings(),
        shutdown_tx.subscribe(),
    );
    tokio::spawn(coordinator.run());

    let mut tasks = Vec::new();
    let mut counters = Vec::new();
    for (i, agent_id) in agents.iter().enumerate() {
        let neighbours: Vec<AgentId> =
            agents.iter().filter(|a| *a != agent_id).cloned().collect();
        let (trainer, calls) = StubTrainer::new(i as f32 * 10.0);
        counters.push(calls);

        let agent = Agent::new(
            agent_id.clone(),
            Arc::clone(&hub),
            settings(coordinator_id.clone(), neighbours, iterations),
            Box::new(trainer),
            Box::new(UniformRandomOne),
            Box::new(FullBlockAssignment),
            Box::new(UniformSimilarity),
        );
        let shutdown = shutdown_tx.clone();
        tasks.push(tokio::spawn(agent.run(shutdown)));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .expect("agent must finish")
            .unwrap()
            .unwrap();
    }
    let _ = shutdown_tx.send(());

    for calls in &counters {
        assert_eq!(calls.load(Ordering::SeqCst) as u64, iterations);
    }
}

#[tokio::test]
async fn similarity_exchange_does_not_stall_the_swarm() {
    let hub = MessageHub::new(64 * 1024);
    let coordinator_id = id("coordinator@swarm");
    let agents: Vec<AgentId> = vec![id("a@swarm"), id("b@swarm")];

    let (shutdown_tx, _) = broadcast::channel(8);

    let (coord_ep, coord_in) = hub.register(coordinator_id.clone());
    tokio::spawn(
        Coordinator::new(
            coord_ep,
            coord_in.sync,
            agents.clone(),
            fast_timings(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let mut tasks = Vec::new();
    for (i, agent_id) in agents.iter().enumerate() {
        let neighbours: Vec<AgentId> =
            agents.iter().filter(|a| *a != agent_id).cloned().collect();
        let (trainer, _calls) = StubTrainer::new(i as f32);
        let mut s = settings(coordinator_id.clone(), neighbours, 2);
        s.algorithm.similarity_exchange = true;

        let agent = Agent::new(
            agent_id.clone(),
            Arc::clone(&hub),
            s,
            Box::new(trainer),
            Box::new(UniformRandomOne),
            Box::new(FullBlockAssignment),
            Box::new(UniformSimilarity),
        );
        tasks.push(tokio::spawn(agent.run(shutdown_tx.clone())));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .expect("agent must finish")
            .unwrap()
            .unwrap();
    }
    let _ = shutdown_tx.send(());
}
