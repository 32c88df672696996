//! Similarity exchange over the hub: an initiated round collects replies,
//! an uninitiated vector is answered automatically on the same
//! conversation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use muster_agent::receiver::SimilarityReceiver;
use muster_agent::{
    MessageHub, ParameterStore, SimilarityManager, UniformSimilarity,
};
use muster_core::wire::{new_conversation_id, Topic};

use crate::{block, id};

#[tokio::test]
async fn initiated_round_collects_the_reply() {
    let hub = MessageHub::new(64 * 1024);
    let (a_ep, a_in) = hub.register(id("a@swarm"));
    let (b_ep, b_in) = hub.register(id("b@swarm"));

    let (shutdown_tx, _) = broadcast::channel(4);

    let a_mgr = Arc::new(SimilarityManager::new(
        id("a@swarm"),
        Box::new(UniformSimilarity),
        ParameterStore::new(block(1.0)),
    ));
    let b_mgr = Arc::new(SimilarityManager::new(
        id("b@swarm"),
        Box::new(UniformSimilarity),
        ParameterStore::new(block(2.0)),
    ));

    tokio::spawn(
        SimilarityReceiver::new(
            a_ep.clone(),
            a_in.similarity,
            Arc::clone(&a_mgr),
            Duration::from_millis(20),
            shutdown_tx.subscribe(),
        )
        .run(),
    );
    tokio::spawn(
        SimilarityReceiver::new(
            b_ep,
            b_in.similarity,
            Arc::clone(&b_mgr),
            Duration::from_millis(20),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    // a initiates a round towards b
    let conversation = new_conversation_id();
    a_mgr.register_outstanding(conversation, &[id("b@swarm")]);
    let own = a_mgr.own_vector();
    a_ep.send(
        &id("b@swarm"),
        Topic::Similarity,
        conversation,
        &own.to_body(),
    )
    .unwrap();

    let outstanding = a_mgr
        .wait_for_replies(conversation, Duration::from_secs(2))
        .await;
    assert!(outstanding.is_empty(), "laggards: {outstanding:?}");

    let replies = a_mgr.replies(&conversation);
    let reply = replies.get(&id("b@swarm")).expect("reply from b");
    assert_eq!(reply.coefficients.len(), block(2.0).len());
    assert!(reply.coefficients.values().all(|c| *c == 1.0));
    assert!(reply.sent_at.is_some());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn unanswered_round_times_out_with_laggards() {
    let hub = MessageHub::new(64 * 1024);
    let (a_ep, _a_in) = hub.register(id("a@swarm"));
    // b registered but runs no similarity receiver
    let (_b_ep, _b_in) = hub.register(id("b@swarm"));

    let a_mgr = SimilarityManager::new(
        id("a@swarm"),
        Box::new(UniformSimilarity),
        ParameterStore::new(block(1.0)),
    );

    let conversation = new_conversation_id();
    a_mgr.register_outstanding(conversation, &[id("b@swarm")]);
    a_ep.send(
        &id("b@swarm"),
        Topic::Similarity,
        conversation,
        &a_mgr.own_vector().to_body(),
    )
    .unwrap();

    let outstanding = a_mgr
        .wait_for_replies(conversation, Duration::from_millis(100))
        .await;
    assert_eq!(outstanding, vec![id("b@swarm")]);
}
