//! Point-in-time copies of agent and system state
//!
//! Provides:
//! - Per-agent bounded snapshot ring buffers
//! - Whole-system snapshots over the last known state of every agent
//! - Binary export/import of a single agent's state (`codec`)

pub mod codec;
pub mod store;

use crate::agent::{AgentId, AgentState, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use store::SnapshotStore;

/// Unique snapshot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parse the textual form produced by `Display`
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A captured copy of one agent's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub id: SnapshotId,
    pub agent_id: AgentId,
    pub state: AgentState,
    pub timestamp: Timestamp,
}

/// A captured copy of every tracked agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub id: SnapshotId,
    pub timestamp: Timestamp,
    pub agents: BTreeMap<AgentId, AgentState>,
}

/// Listing entry for a snapshot, without the state payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub id: SnapshotId,
    pub agent_id: AgentId,
    pub timestamp: Timestamp,
}

/// Listing entry for a system snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemSnapshotInfo {
    pub id: SnapshotId,
    pub timestamp: Timestamp,
    pub agent_count: usize,
}

/// Snapshot store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshots kept per agent
    #[serde(default = "default_agent_capacity")]
    pub agent_capacity: usize,

    /// System snapshots kept
    #[serde(default = "default_system_capacity")]
    pub system_capacity: usize,

    /// Gzip exported records
    #[serde(default)]
    pub compress: bool,
}

fn default_agent_capacity() -> usize {
    10
}

fn default_system_capacity() -> usize {
    100
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            agent_capacity: default_agent_capacity(),
            system_capacity: default_system_capacity(),
            compress: false,
        }
    }
}

impl SnapshotConfig {
    pub fn with_agent_capacity(mut self, capacity: usize) -> Self {
        self.agent_capacity = capacity;
        self
    }

    pub fn with_system_capacity(mut self, capacity: usize) -> Self {
        self.system_capacity = capacity;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_ids_unique_and_parse() {
        let a = SnapshotId::new();
        let b = SnapshotId::new();
        assert_ne!(a, b);
        assert_eq!(SnapshotId::parse(&a.to_string()), Some(a));
        assert_eq!(SnapshotId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_snapshot_config_deserialize() {
        let config: SnapshotConfig = toml::from_str("compress = true").unwrap();
        assert!(config.compress);
        assert_eq!(config.agent_capacity, 10);
        assert_eq!(config.system_capacity, 100);
    }
}
