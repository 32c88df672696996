//! Pending transmission queue — multi-producer, single-consumer FIFO
//! between the receiver tasks and the algorithm state machine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use muster_core::message::ConsensusTransmission;

/// Task-safe FIFO of transmissions awaiting consensus integration.
///
/// Producers: the receiver tasks. Consumer: the Train/Consensus states,
/// which drain the whole backlog at once — there must be exactly one
/// consumer, or integration order is no longer the arrival order.
#[derive(Clone, Default)]
pub struct PendingQueue {
    inner: Arc<Mutex<VecDeque<ConsensusTransmission>>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, tx: ConsensusTransmission) {
        if let Ok(mut q) = self.inner.lock() {
            q.push_back(tx);
        }
    }

    /// Take every queued transmission, oldest first.
    pub fn drain_all(&self) -> Vec<ConsensusTransmission> {
        match self.inner.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::consensus::ParameterBlock;
    use muster_core::identity::AgentId;

    fn tx(sender: &str, value: f32) -> ConsensusTransmission {
        let mut block = ParameterBlock::new();
        block.insert("w".into(), vec![value]);
        let sender: AgentId = sender.parse().unwrap();
        ConsensusTransmission::outbound(block, sender, false)
    }

    #[test]
    fn drains_in_arrival_order() {
        let queue = PendingQueue::new();
        queue.push(tx("a@swarm", 1.0));
        queue.push(tx("b@swarm", 2.0));
        queue.push(tx("a@swarm", 3.0));

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].payload["w"], vec![1.0]);
        assert_eq!(drained[1].payload["w"], vec![2.0]);
        assert_eq!(drained[2].payload["w"], vec![3.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_do_not_lose_entries() {
        let queue = PendingQueue::new();
        let mut handles = Vec::new();
        for t in 0..4 {
            let q = queue.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    q.push(tx("p@swarm", (t * 100 + i) as f32));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 400);
        assert_eq!(queue.drain_all().len(), 400);
    }
}
