//! Snapshot store
//!
//! Every state that crosses the store boundary is cloned, in both directions,
//! so callers can mutate what they pass in or get back without touching the
//! stored history.

use crate::agent::{AgentId, AgentState, Timestamp, now_millis};
use crate::error::{Error, Result};
use crate::registry::AgentTable;
use crate::snapshot::codec;
use crate::snapshot::{
    SnapshotConfig, SnapshotId, SnapshotInfo, StateSnapshot, SystemSnapshot, SystemSnapshotInfo,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// Bounded per-agent and system-wide snapshot history
pub struct SnapshotStore {
    config: SnapshotConfig,
    /// Per-agent ring buffers, oldest first
    buffers: AgentTable<VecDeque<StateSnapshot>>,
    /// Last known good state of each agent
    current: DashMap<AgentId, AgentState>,
    system: Mutex<VecDeque<SystemSnapshot>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(SnapshotConfig::default())
    }
}

impl SnapshotStore {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            buffers: AgentTable::new(),
            current: DashMap::new(),
            system: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Capture `state` for `agent_id`, stamped with the current time
    pub fn create_snapshot(&self, agent_id: AgentId, state: &AgentState) -> Result<SnapshotId> {
        self.create_snapshot_at(agent_id, state, now_millis())
    }

    /// Capture `state` for `agent_id` with an explicit timestamp
    pub fn create_snapshot_at(
        &self,
        agent_id: AgentId,
        state: &AgentState,
        timestamp: Timestamp,
    ) -> Result<SnapshotId> {
        if state.id != agent_id {
            return Err(Error::InvalidInput(format!(
                "state belongs to agent {}, not {}",
                state.id, agent_id
            )));
        }

        let snapshot = StateSnapshot {
            id: SnapshotId::new(),
            agent_id,
            state: state.clone(),
            timestamp,
        };
        let id = snapshot.id;
        let capacity = self.config.agent_capacity.max(1);

        self.buffers.with_or_create(agent_id, VecDeque::new, |buffer, _| {
            buffer.push_back(snapshot);
            while buffer.len() > capacity {
                buffer.pop_front();
            }
        });
        self.current.insert(agent_id, state.clone());

        tracing::debug!(agent = agent_id, snapshot = %id, "snapshot captured");
        Ok(id)
    }

    /// State captured by a specific snapshot
    pub fn restore_snapshot(&self, agent_id: AgentId, snapshot_id: SnapshotId) -> Option<AgentState> {
        self.buffers
            .with(agent_id, |buffer| {
                buffer
                    .iter()
                    .find(|s| s.id == snapshot_id)
                    .map(|s| s.state.clone())
            })
            .flatten()
    }

    /// Most recently captured state
    pub fn restore_latest_snapshot(&self, agent_id: AgentId) -> Option<AgentState> {
        self.buffers
            .with(agent_id, |buffer| buffer.back().map(|s| s.state.clone()))
            .flatten()
    }

    /// State of the latest snapshot taken at or before `timestamp`
    pub fn restore_to_timestamp(&self, agent_id: AgentId, timestamp: Timestamp) -> Option<AgentState> {
        self.buffers
            .with(agent_id, |buffer| {
                buffer
                    .iter()
                    .filter(|s| s.timestamp <= timestamp)
                    .max_by_key(|s| s.timestamp)
                    .map(|s| s.state.clone())
            })
            .flatten()
    }

    /// Capture the last known state of every tracked agent
    pub fn create_system_snapshot(&self) -> SnapshotId {
        self.create_system_snapshot_at(now_millis())
    }

    pub fn create_system_snapshot_at(&self, timestamp: Timestamp) -> SnapshotId {
        let agents: BTreeMap<AgentId, AgentState> = self
            .current
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let snapshot = SystemSnapshot {
            id: SnapshotId::new(),
            timestamp,
            agents,
        };
        let id = snapshot.id;
        let count = snapshot.agents.len();
        let capacity = self.config.system_capacity.max(1);

        let mut history = self.system.lock();
        history.push_back(snapshot);
        while history.len() > capacity {
            history.pop_front();
        }
        drop(history);

        tracing::info!(snapshot = %id, agents = count, "system snapshot captured");
        id
    }

    /// Every agent's state as captured by a system snapshot
    pub fn restore_system_snapshot(&self, snapshot_id: SnapshotId) -> Option<BTreeMap<AgentId, AgentState>> {
        self.system
            .lock()
            .iter()
            .find(|s| s.id == snapshot_id)
            .map(|s| s.agents.clone())
    }

    /// Encode one snapshot for transmission or persistence
    pub fn export_snapshot(&self, agent_id: AgentId, snapshot_id: SnapshotId) -> Result<Vec<u8>> {
        let state = self
            .restore_snapshot(agent_id, snapshot_id)
            .ok_or_else(|| Error::SnapshotNotFound {
                agent: agent_id,
                snapshot: snapshot_id.to_string(),
            })?;
        codec::to_bytes(&state, self.config.compress)
    }

    /// Decode an exported record and store it as a new snapshot
    pub fn import_snapshot(&self, agent_id: AgentId, bytes: &[u8]) -> Result<SnapshotId> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("empty snapshot payload".into()));
        }
        let state = codec::from_bytes(bytes, self.config.compress)?;
        self.create_snapshot(agent_id, &state)
    }

    pub fn snapshot_count(&self, agent_id: AgentId) -> usize {
        self.buffers.with(agent_id, |b| b.len()).unwrap_or(0)
    }

    /// Snapshot metadata for one agent, oldest first
    pub fn list_snapshots(&self, agent_id: AgentId) -> Vec<SnapshotInfo> {
        self.buffers
            .with(agent_id, |buffer| {
                buffer
                    .iter()
                    .map(|s| SnapshotInfo {
                        id: s.id,
                        agent_id: s.agent_id,
                        timestamp: s.timestamp,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop an agent's history and current state; returns snapshots removed
    pub fn delete_snapshots(&self, agent_id: AgentId) -> usize {
        let removed = self.snapshot_count(agent_id);
        self.buffers.remove(agent_id);
        self.current.remove(&agent_id);
        removed
    }

    /// Last known good state of an agent
    pub fn current_state(&self, agent_id: AgentId) -> Option<AgentState> {
        self.current.get(&agent_id).map(|s| s.value().clone())
    }

    pub fn tracked_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.current.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn list_system_snapshots(&self) -> Vec<SystemSnapshotInfo> {
        self.system
            .lock()
            .iter()
            .map(|s| SystemSnapshotInfo {
                id: s.id,
                timestamp: s.timestamp,
                agent_count: s.agents.len(),
            })
            .collect()
    }

    /// JSON rendering of a system snapshot, for operators and audit logs
    pub fn system_manifest_json(&self, snapshot_id: SnapshotId) -> Result<String> {
        let history = self.system.lock();
        let snapshot = history
            .iter()
            .find(|s| s.id == snapshot_id)
            .ok_or(Error::SystemSnapshotNotFound(snapshot_id))?;
        serde_json::to_string_pretty(snapshot).map_err(|e| Error::Serialization(e.to_string()))
    }
}
