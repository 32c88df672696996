//! Training collaborator interface and the shared parameter store.
//!
//! The core never inspects tensor contents beyond the named-block
//! structure needed for consensus averaging; everything about models,
//! datasets, and optimisers lives behind [`Trainer`].

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use muster_core::consensus::ParameterBlock;

/// Scalar evaluation result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub accuracy: f64,
    pub loss: f64,
}

/// One local epoch's result with its wall-clock interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub accuracy: f64,
    pub loss: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EpochMetrics {
    pub fn elapsed_seconds(&self) -> f64 {
        (self.finished_at - self.started_at)
            .num_microseconds()
            .unwrap_or(0) as f64
            / 1e6
    }
}

/// The opaque training/inference unit an agent drives once per iteration.
pub trait Trainer: Send {
    /// Run the configured number of local epochs. One entry per epoch.
    fn train(&mut self) -> Vec<EpochMetrics>;

    /// Evaluate on the validation split.
    fn validate(&mut self) -> Metrics;

    /// Evaluate on the test split.
    fn test(&mut self) -> Metrics;

    /// Snapshot of the current named-parameter block.
    fn current_parameters(&self) -> ParameterBlock;

    /// Replace the live parameters, e.g. after consensus integration.
    fn replace_parameters(&mut self, block: ParameterBlock);
}

/// Shared view of an agent's parameter state: the launch-time initial
/// block (fixed, the similarity baseline) and the live block.
///
/// The live block is written by the algorithm state machine and read
/// concurrently by the similarity path; the lock is held only for the
/// clone, never across an await.
#[derive(Clone)]
pub struct ParameterStore {
    initial: Arc<ParameterBlock>,
    current: Arc<RwLock<ParameterBlock>>,
}

impl ParameterStore {
    pub fn new(initial: ParameterBlock) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial.clone())),
            initial: Arc::new(initial),
        }
    }

    /// The block the agent was launched with.
    pub fn initial(&self) -> &ParameterBlock {
        &self.initial
    }

    /// Clone of the live block.
    pub fn snapshot(&self) -> ParameterBlock {
        self.current
            .read()
            .map(|block| block.clone())
            .unwrap_or_default()
    }

    pub fn replace(&self, block: ParameterBlock) {
        if let Ok(mut current) = self.current.write() {
            *current = block;
        }
    }
}
