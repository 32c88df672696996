//! muster-agent — the agent runtime: message hub, presence bootstrap,
//! receiver tasks, and the gossip-training state machine.

pub mod agent;
pub mod algorithm;
pub mod bootstrap;
pub mod hub;
pub mod policy;
pub mod presence;
pub mod queue;
pub mod receiver;
pub mod similarity;
pub mod trainer;

pub use agent::{Agent, AgentSettings};
pub use algorithm::{AlgorithmMachine, AlgorithmSettings};
pub use bootstrap::{BootstrapTimings, Coordinator, NodeBootstrap};
pub use hub::{Inbox, MessageHub, WireMessage};
pub use policy::{FullBlockAssignment, NeighbourSelection, ParameterAssignment, UniformRandomOne};
pub use presence::{AcquaintanceStatus, PresenceBook};
pub use similarity::{SimilarityFunction, SimilarityManager, UniformSimilarity};
pub use trainer::{EpochMetrics, Metrics, ParameterStore, Trainer};
