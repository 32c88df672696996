//! The two-round bootstrap barrier, run over a real hub with a real
//! coordinator and presence receivers.

use std::time::Duration;

use tokio::sync::broadcast;

use muster_agent::{
    BootstrapTimings, Coordinator, MessageHub, NodeBootstrap, PresenceBook,
};
use muster_agent::presence::PresenceReceiver;
use muster_core::identity::AgentId;
use muster_core::wire::{control, Topic};

use crate::{fast_timings, id};

async fn run_swarm_bootstrap(
    names: &[&str],
    timings: BootstrapTimings,
) -> Vec<PresenceBook> {
    let hub = MessageHub::new(64 * 1024);
    let coordinator_id = id("coordinator@swarm");
    let agents: Vec<AgentId> = names.iter().map(|n| id(n)).collect();

    let (shutdown_tx, _) = broadcast::channel(8);

    let (coord_ep, coord_in) = hub.register(coordinator_id.clone());
    let coordinator = Coordinator::new(
        coord_ep,
        coord_in.sync,
        agents.clone(),
        timings,
        shutdown_tx.subscribe(),
    );
    tokio::spawn(coordinator.run());

    let mut tasks = Vec::new();
    let mut books = Vec::new();
    for agent in &agents {
        let (endpoint, inboxes) = hub.register(agent.clone());
        let neighbours: Vec<AgentId> =
            agents.iter().filter(|a| *a != agent).cloned().collect();
        let book = PresenceBook::new(&neighbours);
        books.push(book.clone());

        let receiver = PresenceReceiver::new(
            endpoint.clone(),
            inboxes.presence,
            book.clone(),
            Duration::from_millis(20),
            shutdown_tx.subscribe(),
        );
        tokio::spawn(receiver.run());

        let node = NodeBootstrap::new(
            endpoint,
            inboxes.sync,
            coordinator_id.clone(),
            book,
            timings,
        );
        tasks.push(tokio::spawn(node.run()));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("bootstrap must terminate")
            .unwrap()
            .unwrap();
    }
    let _ = shutdown_tx.send(());
    books
}

#[tokio::test]
async fn four_nodes_reach_full_mutual_acquaintance() {
    let books = run_swarm_bootstrap(
        &["a@swarm", "b@swarm", "c@swarm", "d@swarm"],
        fast_timings(),
    )
    .await;
    for book in &books {
        assert!(book.fully_mutual());
        assert_eq!(book.available_neighbours().len(), 3);
    }
}

#[tokio::test]
async fn single_pair_bootstraps() {
    let books = run_swarm_bootstrap(&["a@swarm", "b@swarm"], fast_timings()).await;
    for book in &books {
        assert!(book.fully_mutual());
    }
}

#[tokio::test]
async fn duplicate_readiness_reports_are_harmless() {
    let hub = MessageHub::new(64 * 1024);
    let coordinator_id = id("coordinator@swarm");
    let node_id = id("a@swarm");
    let timings = fast_timings();

    let (shutdown_tx, _) = broadcast::channel(2);
    let (coord_ep, coord_in) = hub.register(coordinator_id.clone());
    let coordinator = Coordinator::new(
        coord_ep,
        coord_in.sync,
        vec![node_id.clone()],
        timings,
        shutdown_tx.subscribe(),
    );
    tokio::spawn(coordinator.run());

    let (endpoint, mut inboxes) = hub.register(node_id.clone());
    // readiness sent three times; the barrier must still release once
    for _ in 0..3 {
        endpoint
            .send_control(&coordinator_id, Topic::Sync, control::READY_TO_SUBSCRIBE)
            .unwrap();
    }

    let mut releases = 0;
    loop {
        match inboxes.sync.recv_timeout(Duration::from_millis(200)).await {
            Some(msg) if msg.body.as_ref() == control::START_TO_SUBSCRIBE.as_bytes() => {
                releases += 1;
            }
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(releases, 1);
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn readiness_from_outside_the_set_is_ignored() {
    let hub = MessageHub::new(64 * 1024);
    let coordinator_id = id("coordinator@swarm");
    let member = id("a@swarm");
    let intruder = id("z@swarm");

    let (shutdown_tx, _) = broadcast::channel(2);
    let (coord_ep, coord_in) = hub.register(coordinator_id.clone());
    let coordinator = Coordinator::new(
        coord_ep,
        coord_in.sync,
        vec![member.clone()],
        fast_timings(),
        shutdown_tx.subscribe(),
    );
    tokio::spawn(coordinator.run());

    let (intruder_ep, _intruder_in) = hub.register(intruder);
    let (member_ep, mut member_in) = hub.register(member.clone());

    // an outsider alone must not trip the barrier
    intruder_ep
        .send_control(&coordinator_id, Topic::Sync, control::READY_TO_SUBSCRIBE)
        .unwrap();
    assert!(member_in
        .sync
        .recv_timeout(Duration::from_millis(100))
        .await
        .is_none());

    // the real member does
    member_ep
        .send_control(&coordinator_id, Topic::Sync, control::READY_TO_SUBSCRIBE)
        .unwrap();
    let msg = member_in
        .sync
        .recv_timeout(Duration::from_millis(500))
        .await
        .expect("release expected");
    assert_eq!(msg.body.as_ref(), control::START_TO_SUBSCRIBE.as_bytes());
    let _ = shutdown_tx.send(());
}
