//! Fragmentation across the hub: payloads above the transport ceiling
//! must cross as multiple wire messages and reassemble byte-exact.

use std::time::Duration;

use muster_agent::MessageHub;
use muster_core::codec::Assembler;
use muster_core::wire::{new_conversation_id, Topic, HEADER_LEN};

use crate::id;

#[tokio::test]
async fn large_payload_crosses_the_hub_intact() {
    let max = 4096;
    let hub = MessageHub::new(max);
    let (a, _a_in) = hub.register(id("a@swarm"));
    let (_b, mut b_in) = hub.register(id("b@swarm"));

    let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let sent = a
        .send(&id("b@swarm"), Topic::Layers, new_conversation_id(), &payload)
        .unwrap();
    assert_eq!(sent, payload.len().div_ceil(max - HEADER_LEN));

    let mut assembler = Assembler::new();
    let mut assembled = None;
    for _ in 0..sent {
        let msg = b_in
            .layers
            .recv_timeout(Duration::from_millis(200))
            .await
            .expect("fragment expected");
        assert!(msg.body.len() <= max);
        if let Some(whole) = assembler.assemble(&msg.from, &msg.body) {
            assembled = Some(whole);
        }
    }
    assert_eq!(assembled.expect("payload reassembled").as_ref(), &payload[..]);
}

#[tokio::test]
async fn interleaved_senders_do_not_cross_contaminate() {
    let max = 512;
    let hub = MessageHub::new(max);
    let (a, _a_in) = hub.register(id("a@swarm"));
    let (c, _c_in) = hub.register(id("c@swarm"));
    let (_b, mut b_in) = hub.register(id("b@swarm"));

    let from_a = vec![0xAAu8; 3000];
    let from_c = vec![0xCCu8; 3000];
    a.send(&id("b@swarm"), Topic::Layers, new_conversation_id(), &from_a)
        .unwrap();
    c.send(&id("b@swarm"), Topic::Layers, new_conversation_id(), &from_c)
        .unwrap();

    let mut assembler = Assembler::new();
    let mut whole = Vec::new();
    while whole.len() < 2 {
        let msg = b_in
            .layers
            .recv_timeout(Duration::from_millis(200))
            .await
            .expect("fragment expected");
        if let Some(payload) = assembler.assemble(&msg.from, &msg.body) {
            whole.push((msg.from.clone(), payload));
        }
    }
    for (from, payload) in whole {
        if from == id("a@swarm") {
            assert_eq!(payload.as_ref(), &from_a[..]);
        } else {
            assert_eq!(payload.as_ref(), &from_c[..]);
        }
    }
}

#[tokio::test]
async fn small_payload_is_a_single_message() {
    let hub = MessageHub::new(4096);
    let (a, _a_in) = hub.register(id("a@swarm"));
    let (_b, mut b_in) = hub.register(id("b@swarm"));

    let payload = b"just a small body".to_vec();
    let sent = a
        .send(&id("b@swarm"), Topic::Layers, new_conversation_id(), &payload)
        .unwrap();
    assert_eq!(sent, 1);

    let msg = b_in
        .layers
        .recv_timeout(Duration::from_millis(200))
        .await
        .unwrap();
    let mut assembler = Assembler::new();
    let whole = assembler.assemble(&msg.from, &msg.body).unwrap();
    assert_eq!(whole.as_ref(), &payload[..]);
}
