//! Agent identity — addressable names with bare-identity semantics.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Network identity of an agent: `local@domain`, optionally suffixed with a
/// transient connection resource (`local@domain/resource`).
///
/// Equality and hashing ignore the resource part. Two ids that differ only
/// in resource compare equal and collide in maps — the resource is a
/// per-connection artifact, not part of who the agent is.
#[derive(Debug, Clone)]
pub struct AgentId {
    local: String,
    domain: String,
    resource: Option<String>,
}

impl AgentId {
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
            resource: None,
        }
    }

    /// Short name of the agent, without domain. Used in logs.
    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The identity with any resource suffix stripped.
    pub fn bare(&self) -> AgentId {
        AgentId {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

impl PartialEq for AgentId {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.domain == other.domain
    }
}

impl Eq for AgentId {}

impl Hash for AgentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local.hash(state);
        self.domain.hash(state);
    }
}

impl PartialOrd for AgentId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AgentId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.local, &self.domain).cmp(&(&other.local, &other.domain))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid agent id: {0:?}")]
pub struct InvalidAgentId(pub String);

impl FromStr for AgentId {
    type Err = InvalidAgentId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, resource) = match s.split_once('/') {
            Some((addr, res)) if !res.is_empty() => (addr, Some(res.to_string())),
            Some((addr, _)) => (addr, None),
            None => (s, None),
        };
        let (local, domain) = address
            .split_once('@')
            .ok_or_else(|| InvalidAgentId(s.to_string()))?;
        if local.is_empty() || domain.is_empty() {
            return Err(InvalidAgentId(s.to_string()));
        }
        Ok(AgentId {
            local: local.to_string(),
            domain: domain.to_string(),
            resource,
        })
    }
}

impl Serialize for AgentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Serialize bare: the resource must never leak into payloads.
        serializer.serialize_str(&format!("{}@{}", self.local, self.domain))
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
