//! Similarity exchange — per-parameter similarity vectors advertised to
//! chosen neighbours before parameter assignment.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;

use muster_core::consensus::ParameterBlock;
use muster_core::identity::AgentId;
use muster_core::message::SimilarityVector;
use muster_core::wire::ConversationId;

use crate::trainer::ParameterStore;

/// Scores how far each parameter has drifted between two states.
/// Pluggable — the default is a placeholder and the seam where a real
/// comparison metric goes.
pub trait SimilarityFunction: Send + Sync {
    fn similarity(&self, initial: &ParameterBlock, current: &ParameterBlock)
        -> BTreeMap<String, f32>;
}

/// Placeholder policy: every parameter scores 1.0 ("fully similar"), so
/// the exchange carries no discrimination signal.
pub struct UniformSimilarity;

impl SimilarityFunction for UniformSimilarity {
    fn similarity(
        &self,
        initial: &ParameterBlock,
        _current: &ParameterBlock,
    ) -> BTreeMap<String, f32> {
        initial.keys().map(|k| (k.clone(), 1.0)).collect()
    }
}

/// Tracks similarity conversations this agent initiated and the replies
/// that have come back.
///
/// Written concurrently by the similarity receiver task, read by the
/// waiting loop in the Send state.
pub struct SimilarityManager {
    owner: AgentId,
    function: Box<dyn SimilarityFunction>,
    params: ParameterStore,
    /// conversation -> (neighbour -> reply, if received yet)
    conversations: DashMap<ConversationId, DashMap<AgentId, Option<SimilarityVector>>>,
    /// Sleep between outstanding-set rechecks.
    poll: Duration,
}

impl SimilarityManager {
    pub fn new(owner: AgentId, function: Box<dyn SimilarityFunction>, params: ParameterStore) -> Self {
        Self {
            owner: owner.bare(),
            function,
            params,
            conversations: DashMap::new(),
            poll: Duration::from_millis(200),
        }
    }

    /// Compare the launch-time parameter state against the live one.
    /// `sent_at` is stamped so the vector is ready for the wire.
    pub fn own_vector(&self) -> SimilarityVector {
        let coefficients = self
            .function
            .similarity(self.params.initial(), &self.params.snapshot());
        let mut vector = SimilarityVector::new(coefficients, self.owner.clone());
        vector.sent_at = Some(Utc::now());
        vector
    }

    /// Register the targets of a new exchange round before sending, so a
    /// reply racing the registration cannot be dropped.
    pub fn register_outstanding(&self, conversation: ConversationId, targets: &[AgentId]) {
        let entry = self.conversations.entry(conversation).or_default();
        for target in targets {
            entry.insert(target.bare(), None);
        }
    }

    /// Did this agent initiate `conversation`? If not, an incoming vector
    /// on it is a request that must be answered with our own vector.
    pub fn initiated(&self, conversation: &ConversationId) -> bool {
        self.conversations.contains_key(conversation)
    }

    /// Record a neighbour's reply. Returns false when the conversation is
    /// unknown, i.e. this vector is a request, not a reply.
    pub fn record_reply(&self, conversation: ConversationId, vector: SimilarityVector) -> bool {
        match self.conversations.get(&conversation) {
            Some(entry) => {
                entry.insert(vector.owner.bare(), Some(vector));
                true
            }
            None => false,
        }
    }

    /// Neighbours of `conversation` that have not replied yet.
    pub fn outstanding(&self, conversation: &ConversationId) -> Vec<AgentId> {
        let Some(entry) = self.conversations.get(conversation) else {
            return Vec::new();
        };
        let mut waiting: Vec<_> = entry
            .iter()
            .filter(|kv| kv.value().is_none())
            .map(|kv| kv.key().clone())
            .collect();
        waiting.sort();
        waiting
    }

    /// Replies received so far for `conversation`.
    pub fn replies(&self, conversation: &ConversationId) -> HashMap<AgentId, SimilarityVector> {
        let Some(entry) = self.conversations.get(conversation) else {
            return HashMap::new();
        };
        entry
            .iter()
            .filter_map(|kv| kv.value().clone().map(|v| (kv.key().clone(), v)))
            .collect()
    }

    /// Sleep-and-recheck until every outstanding target replied or the
    /// deadline passes. Returns whoever is still outstanding.
    pub async fn wait_for_replies(
        &self,
        conversation: ConversationId,
        timeout: Duration,
    ) -> Vec<AgentId> {
        let deadline = Instant::now() + timeout;
        loop {
            let waiting = self.outstanding(&conversation);
            if waiting.is_empty() || Instant::now() >= deadline {
                return waiting;
            }
            let remaining = deadline - Instant::now();
            tokio::time::sleep(self.poll.min(remaining)).await;
        }
    }

    /// Drop the bookkeeping of a finished exchange round.
    pub fn forget(&self, conversation: &ConversationId) {
        self.conversations.remove(conversation);
    }

    #[cfg(test)]
    pub(crate) fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }
}
