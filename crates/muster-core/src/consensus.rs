//! Consensus engine — weighted elementwise averaging of parameter blocks
//! and the incremental integration rule for queued peer transmissions.
//!
//! Pure numeric core: no clocks other than the processed-timestamp stamps,
//! no I/O, no knowledge of how transmissions arrived.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use crate::config::ConfigError;
use crate::message::{ConsensusTransmission, ProtocolError};

/// Ordered mapping from parameter name to its flat numeric values. The
/// unit exchanged between agents and combined by consensus.
pub type ParameterBlock = BTreeMap<String, Vec<f32>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("parameter block schema mismatch: key {key:?} present on only one side")]
    SchemaMismatch { key: String },

    #[error("parameter {key:?} has {left} elements on one side and {right} on the other")]
    ShapeMismatch {
        key: String,
        left: usize,
        right: usize,
    },
}

// ── Weight derivation ────────────────────────────────────────────────────────

/// Consensus mixing weight, derived as `1/max_order - margin`.
///
/// `max_order` bounds how many neighbours a node may average against in one
/// round; keeping the weight strictly below `1/max_order` bounds any single
/// peer's contribution, so repeated pairwise folds approach a multi-way
/// average without overweighting the most recent neighbour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusWeight(f32);

impl ConsensusWeight {
    pub fn derive(max_order: u32, margin: f32) -> Result<Self, ConfigError> {
        if max_order <= 1 {
            return Err(ConfigError::InvalidMaxOrder(max_order));
        }
        if margin <= 0.0 {
            return Err(ConfigError::InvalidMargin(margin));
        }
        let weight = 1.0 / max_order as f32 - margin;
        if weight <= 0.0 {
            return Err(ConfigError::InvalidMargin(margin));
        }
        Ok(Self(weight))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

// ── Pairwise combination ─────────────────────────────────────────────────────

/// `result[k] = weight * a[k] + (1 - weight) * b[k]`, elementwise.
///
/// Fails unless the two blocks carry identical key sets and matching
/// element counts per key. Inputs are never mutated.
pub fn combine(
    a: &ParameterBlock,
    b: &ParameterBlock,
    weight: f32,
) -> Result<ParameterBlock, ConsensusError> {
    if let Some(key) = b.keys().find(|k| !a.contains_key(*k)) {
        return Err(ConsensusError::SchemaMismatch { key: key.clone() });
    }
    let mut result = ParameterBlock::new();
    for (key, values_a) in a {
        let values_b = b
            .get(key)
            .ok_or_else(|| ConsensusError::SchemaMismatch { key: key.clone() })?;
        result.insert(key.clone(), combine_values(key, values_a, values_b, weight)?);
    }
    Ok(result)
}

/// Fold a named subset of parameters into a full block: keys named by
/// `subset` are combined with `weight` on the subset side, every other key
/// of `current` passes through unchanged.
///
/// A subset key absent from `current` is a schema mismatch — a peer may
/// send fewer parameters than the full model, never unknown ones.
pub fn fold_subset(
    current: &ParameterBlock,
    subset: &ParameterBlock,
    weight: f32,
) -> Result<ParameterBlock, ConsensusError> {
    let mut result = current.clone();
    for (key, incoming) in subset {
        let existing = current
            .get(key)
            .ok_or_else(|| ConsensusError::SchemaMismatch { key: key.clone() })?;
        result.insert(key.clone(), combine_values(key, incoming, existing, weight)?);
    }
    Ok(result)
}

fn combine_values(
    key: &str,
    a: &[f32],
    b: &[f32],
    weight: f32,
) -> Result<Vec<f32>, ConsensusError> {
    if a.len() != b.len() {
        return Err(ConsensusError::ShapeMismatch {
            key: key.to_string(),
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| weight * x + (1.0 - weight) * y)
        .collect())
}

// ── Staleness ────────────────────────────────────────────────────────────────

/// Policy verdict on a received transmission, judged by elapsed transit
/// time before it may be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Within the acceptance window (boundary inclusive) — enqueue it.
    Fresh(Duration),
    /// Over the window — discard, do not integrate.
    Stale(Duration),
}

/// Judge a transmission against the acceptance window.
///
/// A transmission with no send timestamp is a protocol violation by the
/// sender, not a policy discard.
pub fn check_staleness(
    tx: &ConsensusTransmission,
    window: Duration,
) -> Result<Staleness, ProtocolError> {
    let sent_at = tx
        .sent_at
        .ok_or_else(|| ProtocolError::MissingTimestamp(tx.sender.clone()))?;
    let received_at = tx.received_at.unwrap_or_else(Utc::now);
    let elapsed = received_at - sent_at;
    if elapsed <= window {
        Ok(Staleness::Fresh(elapsed))
    } else {
        Ok(Staleness::Stale(elapsed))
    }
}

// ── Incremental integration ──────────────────────────────────────────────────

/// Applies queued peer transmissions to a running parameter block, oldest
/// first. The sole mutation path from peer input to an agent's live
/// parameter state.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusEngine {
    weight: ConsensusWeight,
}

impl ConsensusEngine {
    pub fn new(max_order: u32, margin: f32) -> Result<Self, ConfigError> {
        Ok(Self {
            weight: ConsensusWeight::derive(max_order, margin)?,
        })
    }

    pub fn weight(&self) -> f32 {
        self.weight.value()
    }

    /// Fold every pending transmission into `current`, FIFO. Each consumed
    /// transmission is stamped with its processing interval and returned so
    /// the caller can log who contributed.
    pub fn integrate(
        &self,
        current: &ParameterBlock,
        pending: Vec<ConsensusTransmission>,
    ) -> Result<(ParameterBlock, Vec<ConsensusTransmission>), ConsensusError> {
        let mut block = current.clone();
        let mut consumed = Vec::with_capacity(pending.len());
        for mut tx in pending {
            tx.processed_start = Some(Utc::now());
            block = fold_subset(&block, &tx.payload, self.weight.value())?;
            tx.processed_end = Some(Utc::now());
            consumed.push(tx);
        }
        Ok((block, consumed))
    }
}
