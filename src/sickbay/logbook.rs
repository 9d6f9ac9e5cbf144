//! Bounded failure history
//!
//! Appends and evictions happen under one lock, so a concurrent reader never
//! observes a log above capacity.

use crate::agent::AgentId;
use crate::sickbay::failure::{FailureEvent, FailureType};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// Default number of events kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Ordered, capacity-bounded log of failure events (oldest evicted first)
#[derive(Debug)]
pub struct FailureLog {
    capacity: usize,
    events: Mutex<VecDeque<FailureEvent>>,
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, evicting the oldest entries above capacity
    pub fn record(&self, event: FailureEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// All retained events for one agent, oldest first
    pub fn for_agent(&self, agent_id: AgentId) -> Vec<FailureEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Number of retained events per failure type
    pub fn counts_by_type(&self) -> BTreeMap<FailureType, usize> {
        let mut counts = BTreeMap::new();
        for event in self.events.lock().iter() {
            *counts.entry(event.failure_type()).or_insert(0) += 1;
        }
        counts
    }

    /// The last `n` events, oldest first
    pub fn recent(&self, n: usize) -> Vec<FailureEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<FailureEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Remove every event for one agent, returning how many were dropped
    pub fn clear_agent(&self, agent_id: AgentId) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.agent_id != agent_id);
        before - events.len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
