//! Pluggable per-agent policies — neighbour selection and parameter
//! assignment. The agent composes these instead of subclassing roles.

use std::collections::HashMap;

use rand::seq::SliceRandom;

use muster_core::consensus::ParameterBlock;
use muster_core::identity::AgentId;
use muster_core::message::SimilarityVector;

/// Chooses which of the currently available neighbours to exchange with
/// this round. An empty result skips the exchange entirely.
pub trait NeighbourSelection: Send + Sync {
    fn select(&self, available: &[AgentId]) -> Vec<AgentId>;
}

/// Default policy: one neighbour, uniformly at random.
pub struct UniformRandomOne;

impl NeighbourSelection for UniformRandomOne {
    fn select(&self, available: &[AgentId]) -> Vec<AgentId> {
        available
            .choose(&mut rand::thread_rng())
            .cloned()
            .into_iter()
            .collect()
    }
}

/// Exchange with every available neighbour. Used in tests and small
/// topologies.
pub struct AllNeighbours;

impl NeighbourSelection for AllNeighbours {
    fn select(&self, available: &[AgentId]) -> Vec<AgentId> {
        available.to_vec()
    }
}

/// Decides which named parameters each selected neighbour receives,
/// optionally steered by the exchanged similarity vectors.
pub trait ParameterAssignment: Send + Sync {
    fn assign(
        &self,
        block: &ParameterBlock,
        own_vector: Option<&SimilarityVector>,
        neighbour_vectors: &HashMap<AgentId, SimilarityVector>,
        selected: &[AgentId],
    ) -> Vec<(AgentId, ParameterBlock)>;
}

/// Default policy: every selected neighbour gets the full block.
pub struct FullBlockAssignment;

impl ParameterAssignment for FullBlockAssignment {
    fn assign(
        &self,
        block: &ParameterBlock,
        _own_vector: Option<&SimilarityVector>,
        _neighbour_vectors: &HashMap<AgentId, SimilarityVector>,
        selected: &[AgentId],
    ) -> Vec<(AgentId, ParameterBlock)> {
        selected.iter().map(|n| (n.bare(), block.clone())).collect()
    }
}
