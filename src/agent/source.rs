//! Live agent state sources and boundary validation
//!
//! The control plane only sees agents through `AgentStateSource`. Two variants
//! ship with the crate: an in-memory simulated fleet and an external feed that
//! publishes whole-fleet updates over a watch channel.

use crate::agent::state::{AgentId, AgentState, Vec2};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// Supplies the current state of every agent
pub trait AgentStateSource: Send + Sync {
    fn current_states(&self) -> Vec<AgentState>;
}

/// Decides whether a position is inside the operating area
pub trait BoundaryValidator: Send + Sync {
    fn is_position_valid(&self, position: Vec2) -> bool;
}

/// In-memory fleet, driven directly by a simulation loop or tests
#[derive(Debug, Default)]
pub struct SimulatedSource {
    agents: RwLock<BTreeMap<AgentId, AgentState>>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent's state
    pub fn upsert(&self, state: AgentState) {
        self.agents.write().insert(state.id, state);
    }

    /// Mutate an agent in place, returns false if it is not present
    pub fn update<F>(&self, id: AgentId, f: F) -> bool
    where
        F: FnOnce(&mut AgentState),
    {
        match self.agents.write().get_mut(&id) {
            Some(state) => {
                f(state);
                true
            }
            None => false,
        }
    }

    /// Drop an agent from the feed
    pub fn remove(&self, id: AgentId) -> Option<AgentState> {
        self.agents.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl AgentStateSource for SimulatedSource {
    fn current_states(&self) -> Vec<AgentState> {
        self.agents.read().values().cloned().collect()
    }
}

/// External feed: the latest fleet snapshot published on a watch channel
pub struct FeedSource {
    rx: watch::Receiver<Vec<AgentState>>,
}

impl FeedSource {
    pub fn new(rx: watch::Receiver<Vec<AgentState>>) -> Self {
        Self { rx }
    }

    /// Create a feed together with the sender the external system publishes on
    pub fn channel() -> (watch::Sender<Vec<AgentState>>, Self) {
        let (tx, rx) = watch::channel(Vec::new());
        (tx, Self::new(rx))
    }
}

impl AgentStateSource for FeedSource {
    fn current_states(&self) -> Vec<AgentState> {
        self.rx.borrow().clone()
    }
}

/// Axis-aligned rectangular operating area (inclusive bounds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectBoundary {
    pub min: Vec2,
    pub max: Vec2,
}

impl RectBoundary {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }
}

impl BoundaryValidator for RectBoundary {
    fn is_position_valid(&self, position: Vec2) -> bool {
        position.x >= self.min.x
            && position.x <= self.max.x
            && position.y >= self.min.y
            && position.y <= self.max.y
    }
}
