//! Consensus over the wire: serialized transmissions integrated with the
//! derived mixing weight, staleness enforced at the receiving edge.

use std::time::Duration;

use muster_agent::MessageHub;
use muster_core::codec::Assembler;
use muster_core::consensus::{check_staleness, ConsensusEngine, Staleness};
use muster_core::message::ConsensusTransmission;
use muster_core::wire::{new_conversation_id, Topic};

use crate::{block, id};

#[tokio::test]
async fn transmission_integrates_with_derived_weight() {
    let hub = MessageHub::new(64 * 1024);
    let (a, _a_in) = hub.register(id("a@swarm"));
    let (_b, mut b_in) = hub.register(id("b@swarm"));

    let tx = ConsensusTransmission::outbound(block(11.0), id("a@swarm"), false);
    a.send(
        &id("b@swarm"),
        Topic::Layers,
        new_conversation_id(),
        &tx.to_body(),
    )
    .unwrap();

    let msg = b_in
        .layers
        .recv_timeout(Duration::from_millis(200))
        .await
        .unwrap();
    let mut assembler = Assembler::new();
    let payload = assembler.assemble(&msg.from, &msg.body).unwrap();
    let received = ConsensusTransmission::from_body(msg.from.bare(), &payload).unwrap();

    assert!(matches!(
        check_staleness(&received, chrono::Duration::seconds(60)).unwrap(),
        Staleness::Fresh(_)
    ));

    // max_order 4, margin 0.05 -> weight 0.2
    let engine = ConsensusEngine::new(4, 0.05).unwrap();
    let (merged, consumed) = engine.integrate(&block(1.0), vec![received]).unwrap();
    // 0.2 * 11 + 0.8 * 1 = 3.0
    for values in merged.values() {
        for v in values {
            assert!((v - 3.0).abs() < 1e-5);
        }
    }
    assert_eq!(consumed.len(), 1);
    assert!(consumed[0].processed_start.is_some());
    assert!(consumed[0].processed_end.is_some());
}

#[tokio::test]
async fn stale_transmission_is_rejected_at_the_edge() {
    let mut tx = ConsensusTransmission::outbound(block(5.0), id("a@swarm"), false);
    tx.sent_at = Some(chrono::Utc::now() - chrono::Duration::seconds(180));

    let parsed = ConsensusTransmission::from_body(id("a@swarm"), &tx.to_body()).unwrap();
    assert!(matches!(
        check_staleness(&parsed, chrono::Duration::seconds(120)).unwrap(),
        Staleness::Stale(_)
    ));
}

#[tokio::test]
async fn fifo_integration_order_matches_arrival_order() {
    let engine = ConsensusEngine::new(4, 0.05).unwrap();
    let pending = vec![
        ConsensusTransmission::outbound(block(10.0), id("a@swarm"), false),
        ConsensusTransmission::outbound(block(7.0), id("b@swarm"), false),
        ConsensusTransmission::outbound(block(3.0), id("c@swarm"), false),
    ];
    let (merged, consumed) = engine.integrate(&block(0.0), pending).unwrap();
    // applied oldest first:
    // step1: 0.2*10 + 0.8*0  = 2.0
    // step2: 0.2*7  + 0.8*2.0 = 3.0
    // step3: 0.2*3  + 0.8*3.0 = 3.0
    for values in merged.values() {
        for v in values {
            assert!((v - 3.0).abs() < 1e-4);
        }
    }
    assert_eq!(consumed[0].sender, id("a@swarm"));
    assert_eq!(consumed[2].sender, id("c@swarm"));
}
