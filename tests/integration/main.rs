//! Muster integration test harness.
//!
//! Everything runs against a real in-process message hub: multiple
//! agents, the coordinator, and the full bootstrap/algorithm lifecycle.
//! Tests shrink the protocol timings so a full swarm run finishes in
//! well under a second.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use muster_agent::{BootstrapTimings, EpochMetrics, Metrics, Trainer};
use muster_core::consensus::ParameterBlock;
use muster_core::identity::AgentId;

mod bootstrap;
mod codec;
mod consensus;
mod similarity;
mod swarm;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn id(s: &str) -> AgentId {
    s.parse().expect("valid agent id")
}

pub fn block(value: f32) -> ParameterBlock {
    let mut b = ParameterBlock::new();
    b.insert("weights".into(), vec![value; 8]);
    b.insert("bias".into(), vec![value]);
    b
}

/// Timings tight enough that a full bootstrap completes in milliseconds.
pub fn fast_timings() -> BootstrapTimings {
    BootstrapTimings {
        node_sync_timeout: Duration::from_millis(20),
        coordinator_sync_timeout: Duration::from_millis(20),
        subscribe_retry: Duration::from_millis(10),
    }
}

/// Fixed-parameter trainer that counts its training calls. Keeps whatever
/// parameters consensus hands it, so integration effects are observable.
pub struct StubTrainer {
    pub calls: Arc<AtomicU32>,
    pub block: ParameterBlock,
}

impl StubTrainer {
    pub fn new(value: f32) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
                block: block(value),
            },
            calls,
        )
    }
}

impl Trainer for StubTrainer {
    fn train(&mut self) -> Vec<EpochMetrics> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        vec![EpochMetrics {
            accuracy: 1.0,
            loss: 0.0,
            started_at: now,
            finished_at: now,
        }]
    }

    fn validate(&mut self) -> Metrics {
        Metrics {
            accuracy: 1.0,
            loss: 0.0,
        }
    }

    fn test(&mut self) -> Metrics {
        Metrics {
            accuracy: 1.0,
            loss: 0.0,
        }
    }

    fn current_parameters(&self) -> ParameterBlock {
        self.block.clone()
    }

    fn replace_parameters(&mut self, block: ParameterBlock) {
        self.block = block;
    }
}
