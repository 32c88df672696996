//! muster-core — protocol types, multipart codec, and the consensus engine.
//! All other Muster crates depend on this one. Nothing in here touches the
//! network or the async runtime; it operates on already-received or
//! about-to-be-sent payloads.

pub mod codec;
pub mod config;
pub mod consensus;
pub mod identity;
pub mod message;
pub mod wire;

pub use consensus::{ConsensusEngine, ConsensusWeight, ParameterBlock};
pub use identity::AgentId;
pub use message::{ConsensusTransmission, SimilarityVector};
