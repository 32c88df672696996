//! Structured message bodies — parameter transmissions and similarity
//! vectors, plus the fixed textual timestamp format they carry.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::ParameterBlock;
use crate::identity::AgentId;

/// Timestamp format used in every wire body. UTC, microsecond precision,
/// explicit Z suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Render a UTC instant in the wire format.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a wire-format timestamp back into a UTC instant.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ProtocolError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| ProtocolError::BadTimestamp(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The sender omitted the send timestamp. A transmission without one
    /// cannot be judged for staleness and is a protocol violation.
    #[error("transmission from {0} carries no send timestamp")]
    MissingTimestamp(AgentId),

    #[error("malformed timestamp: {0:?}")]
    BadTimestamp(String),

    #[error("malformed message body: {0}")]
    MalformedBody(String),
}

// ── Parameter transmission ───────────────────────────────────────────────────

/// JSON body of a parameter transmission on the layers topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransmissionBody {
    /// Named parameter block being shared.
    model: ParameterBlock,
    /// When the sender built this body. Wire format, UTC.
    sent_time: Option<String>,
    /// Set by the receiver before logging/debugging. Absent on the wire
    /// from the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    received_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_end_time: Option<String>,
    /// Sender asks for the same parameter subset back.
    #[serde(default)]
    request_reply: bool,
}

/// One peer-to-peer parameter delivery, from creation through consensus
/// integration.
///
/// Owned exclusively by the receiving agent's pending queue until the
/// consensus engine drains it. The processed timestamps are stamped only
/// by the engine.
#[derive(Debug, Clone)]
pub struct ConsensusTransmission {
    pub payload: ParameterBlock,
    pub sender: AgentId,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub processed_start: Option<DateTime<Utc>>,
    pub processed_end: Option<DateTime<Utc>>,
    pub request_reply: bool,
}

impl ConsensusTransmission {
    /// Build an outbound transmission. `sent_at` is stamped now.
    pub fn outbound(payload: ParameterBlock, sender: AgentId, request_reply: bool) -> Self {
        Self {
            payload,
            sender,
            sent_at: Some(Utc::now()),
            received_at: None,
            processed_start: None,
            processed_end: None,
            request_reply,
        }
    }

    /// Serialize for the wire. Stamps `sent_at` if the caller has not.
    pub fn to_body(&self) -> Vec<u8> {
        let body = TransmissionBody {
            model: self.payload.clone(),
            sent_time: Some(format_timestamp(self.sent_at.unwrap_or_else(Utc::now))),
            received_time: self.received_at.map(format_timestamp),
            processed_start_time: self.processed_start.map(format_timestamp),
            processed_end_time: self.processed_end.map(format_timestamp),
            request_reply: self.request_reply,
        };
        // BTreeMap/String/f32 cannot fail to serialize
        serde_json::to_vec(&body).unwrap_or_default()
    }

    /// Parse a received body. `received_at` is stamped now unless the body
    /// already carries one (debug replays). A missing or malformed send
    /// timestamp parses as `sent_at: None`; the staleness check turns that
    /// into [`ProtocolError::MissingTimestamp`].
    pub fn from_body(sender: AgentId, body: &[u8]) -> Result<Self, ProtocolError> {
        let parsed: TransmissionBody = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::MalformedBody(e.to_string()))?;
        let sent_at = match parsed.sent_time.as_deref() {
            Some(s) => Some(parse_timestamp(s)?),
            None => None,
        };
        let received_at = match parsed.received_time.as_deref() {
            Some(s) => Some(parse_timestamp(s)?),
            None => Some(Utc::now()),
        };
        Ok(Self {
            payload: parsed.model,
            sender,
            sent_at,
            received_at,
            processed_start: None,
            processed_end: None,
            request_reply: parsed.request_reply,
        })
    }

    /// Wall-clock delay between sending and receiving.
    pub fn transit_time(&self) -> Option<chrono::Duration> {
        Some(self.received_at? - self.sent_at?)
    }
}

// ── Similarity vector ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimilarityBody {
    /// Parameter name -> similarity coefficient.
    vector: BTreeMap<String, f32>,
    sent_time: Option<String>,
}

/// Per-parameter similarity advertisement, produced by comparing an
/// agent's initial and current parameter state.
#[derive(Debug, Clone)]
pub struct SimilarityVector {
    pub coefficients: BTreeMap<String, f32>,
    pub owner: AgentId,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
}

impl SimilarityVector {
    pub fn new(coefficients: BTreeMap<String, f32>, owner: AgentId) -> Self {
        Self {
            coefficients,
            owner,
            sent_at: None,
            received_at: None,
        }
    }

    pub fn to_body(&self) -> Vec<u8> {
        let body = SimilarityBody {
            vector: self.coefficients.clone(),
            sent_time: Some(format_timestamp(self.sent_at.unwrap_or_else(Utc::now))),
        };
        serde_json::to_vec(&body).unwrap_or_default()
    }

    pub fn from_body(owner: AgentId, body: &[u8]) -> Result<Self, ProtocolError> {
        let parsed: SimilarityBody = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::MalformedBody(e.to_string()))?;
        let sent_at = match parsed.sent_time.as_deref() {
            Some(s) => Some(parse_timestamp(s)?),
            None => None,
        };
        Ok(Self {
            coefficients: parsed.vector,
            owner,
            sent_at,
            received_at: Some(Utc::now()),
        })
    }
}
