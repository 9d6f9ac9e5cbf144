//! Periodic failure detection
//!
//! Each tick walks every agent the state source reports and runs, in order:
//! timeout, battery, status and boundary checks. Afterwards all tracked agents
//! are scanned for ones that vanished from the feed. Every candidate failure
//! goes through the (agent, type) dedup window before it is emitted.

use crate::agent::{AgentId, AgentState, AgentStateSource, AgentStatus, BoundaryValidator, Timestamp, now_millis};
use crate::error::{Error, Result};
use crate::sickbay::beacon::{EventSink, SwarmEvent, TracingSink};
use crate::sickbay::failure::{Failure, FailureEvent, FailureType};
use crate::sickbay::logbook::FailureLog;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Health monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Silence after which an agent is reported as timed out (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum gap between two reports of the same (agent, type) pair (ms)
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// Battery percentage at or below which a warning is logged
    #[serde(default = "default_battery_warning")]
    pub battery_warning: f64,

    /// Failure events kept in the monitor's history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Interval between ticks when driven by the fleet runtime (ms)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Failure events a subscriber may fall behind before it starts losing them
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_dedup_window_ms() -> u64 {
    10_000
}

fn default_battery_warning() -> f64 {
    20.0
}

fn default_history_capacity() -> usize {
    500
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            dedup_window_ms: default_dedup_window_ms(),
            battery_warning: default_battery_warning(),
            history_capacity: default_history_capacity(),
            tick_interval_ms: default_tick_interval_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl MonitorConfig {
    /// Silence after which an agent missing from the feed is reported
    pub fn missing_threshold_ms(&self) -> u64 {
        self.timeout_ms.saturating_mul(2)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_dedup_window_ms(mut self, window_ms: u64) -> Self {
        self.dedup_window_ms = window_ms;
        self
    }

    pub fn with_battery_warning(mut self, level: f64) -> Self {
        self.battery_warning = level;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_tick_interval_ms(mut self, interval_ms: u64) -> Self {
        self.tick_interval_ms = interval_ms;
        self
    }

    pub fn with_subscriber_buffer(mut self, capacity: usize) -> Self {
        self.subscriber_buffer = capacity;
        self
    }
}

/// Counters exposed by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorMetrics {
    pub ticks: u64,
    pub failures_emitted: u64,
    pub failures_suppressed: u64,
    pub tracked_agents: usize,
}

/// Detects and classifies agent failures
pub struct HealthMonitor {
    config: MonitorConfig,
    source: Option<Arc<dyn AgentStateSource>>,
    validator: Option<Arc<dyn BoundaryValidator>>,
    sink: Arc<dyn EventSink>,
    /// Last tick at which each agent was present in the feed
    last_seen: DashMap<AgentId, Timestamp>,
    /// Last emission per (agent, type)
    dedup: DashMap<(AgentId, FailureType), Timestamp>,
    battery_warned: DashSet<AgentId>,
    failures: FailureLog,
    ticks: AtomicU64,
    total_failures: AtomicU64,
    suppressed: AtomicU64,
    events: broadcast::Sender<FailureEvent>,
}

impl HealthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(config.subscriber_buffer.max(1));
        Self {
            failures: FailureLog::new(config.history_capacity),
            config,
            source: None,
            validator: None,
            sink: Arc::new(TracingSink),
            last_seen: DashMap::new(),
            dedup: DashMap::new(),
            battery_warned: DashSet::new(),
            ticks: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            events,
        }
    }

    /// Attach the live state feed
    pub fn with_source(mut self, source: Arc<dyn AgentStateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a boundary validator; without one the boundary check is skipped
    pub fn with_validator(mut self, validator: Arc<dyn BoundaryValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Receive every emitted failure event
    pub fn subscribe(&self) -> broadcast::Receiver<FailureEvent> {
        self.events.subscribe()
    }

    /// Run one detection pass. Returns the number of events emitted.
    pub fn tick(&self, now: Timestamp) -> Result<usize> {
        let source = self.source.as_ref().ok_or(Error::DetectionUnavailable)?;
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let mut emitted = 0;
        for state in source.current_states() {
            self.last_seen.insert(state.id, now);
            emitted += self.check_agent(&state, now);
        }

        // Agents that disappeared from the feed entirely
        let missing_after = self.config.missing_threshold_ms() as i64;
        let missing: Vec<(AgentId, i64)> = self
            .last_seen
            .iter()
            .map(|e| (*e.key(), now.saturating_sub(*e.value())))
            .filter(|(_, silent)| *silent > missing_after)
            .collect();
        for (agent_id, silent_ms) in missing {
            let reason = format!(
                "missing from state feed for {:.1}s",
                silent_ms as f64 / 1000.0
            );
            if self
                .report_at(now, agent_id, Failure::CommunicationLost { reason })
                .is_some()
            {
                emitted += 1;
            }
        }

        // Entries older than the window can no longer suppress anything
        let window = self.config.dedup_window_ms as i64;
        self.dedup.retain(|_, last| now.saturating_sub(*last) < window);

        Ok(emitted)
    }

    fn check_agent(&self, state: &AgentState, now: Timestamp) -> usize {
        let mut found = Vec::new();

        // Timeout
        let silent_ms = now.saturating_sub(state.last_update);
        if silent_ms > self.config.timeout_ms as i64 {
            found.push(Failure::Timeout { silent_ms });
        }

        // Battery
        if state.battery <= 0.0 {
            found.push(Failure::BatteryDepleted {
                level: state.battery,
            });
        } else if state.battery <= self.config.battery_warning {
            if self.battery_warned.insert(state.id) {
                tracing::warn!(
                    agent = state.id,
                    battery = state.battery,
                    "battery low"
                );
            }
        } else {
            self.battery_warned.remove(&state.id);
        }

        // Externally reported status
        if state.status == AgentStatus::Failed {
            found.push(Failure::SystemError {
                status: state.status,
            });
        }

        // Boundary
        if let Some(validator) = &self.validator {
            if !validator.is_position_valid(state.position) {
                found.push(Failure::BoundaryViolation {
                    position: state.position,
                });
            }
        }

        found
            .into_iter()
            .filter_map(|failure| self.report_at(now, state.id, failure))
            .count()
    }

    /// Emit a failure unless the same (agent, type) pair was reported within
    /// the dedup window. Returns the event when it was emitted.
    pub fn report_at(
        &self,
        now: Timestamp,
        agent_id: AgentId,
        failure: Failure,
    ) -> Option<FailureEvent> {
        let key = (agent_id, failure.failure_type());
        let window = self.config.dedup_window_ms as i64;

        let fresh = match self.dedup.entry(key) {
            Entry::Occupied(mut last) => {
                if now.saturating_sub(*last.get()) < window {
                    false
                } else {
                    last.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        };

        if !fresh {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(agent = agent_id, failure = %key.1, "duplicate failure suppressed");
            return None;
        }

        let event = FailureEvent::new(now, agent_id, failure);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.failures.record(event.clone());
        self.sink.publish(&SwarmEvent::from(&event));
        // No subscribers is fine
        let _ = self.events.send(event.clone());
        Some(event)
    }

    pub fn report_collision(&self, agent_id: AgentId, with: Option<AgentId>) -> Option<FailureEvent> {
        self.report_at(now_millis(), agent_id, Failure::Collision { with })
    }

    pub fn report_communication_loss(
        &self,
        agent_id: AgentId,
        reason: impl Into<String>,
    ) -> Option<FailureEvent> {
        self.report_at(
            now_millis(),
            agent_id,
            Failure::CommunicationLost {
                reason: reason.into(),
            },
        )
    }

    pub fn report_sensor_failure(
        &self,
        agent_id: AgentId,
        sensor: impl Into<String>,
    ) -> Option<FailureEvent> {
        self.report_at(
            now_millis(),
            agent_id,
            Failure::SensorFailure {
                sensor: sensor.into(),
            },
        )
    }

    pub fn report_overload(&self, agent_id: AgentId, load: f64) -> Option<FailureEvent> {
        self.report_at(now_millis(), agent_id, Failure::Overload { load })
    }

    /// Stop tracking an agent (e.g. after it was decommissioned)
    pub fn forget(&self, agent_id: AgentId) {
        self.last_seen.remove(&agent_id);
        self.battery_warned.remove(&agent_id);
        self.dedup.retain(|(agent, _), _| *agent != agent_id);
    }

    pub fn tracked_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.last_seen.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn failures_for(&self, agent_id: AgentId) -> Vec<FailureEvent> {
        self.failures.for_agent(agent_id)
    }

    pub fn failure_counts(&self) -> BTreeMap<FailureType, usize> {
        self.failures.counts_by_type()
    }

    pub fn recent_failures(&self, n: usize) -> Vec<FailureEvent> {
        self.failures.recent(n)
    }

    pub fn clear_failures_for(&self, agent_id: AgentId) -> usize {
        self.failures.clear_agent(agent_id)
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Total events ever emitted (not bounded by history capacity)
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> MonitorMetrics {
        MonitorMetrics {
            ticks: self.ticks.load(Ordering::Relaxed),
            failures_emitted: self.total_failures.load(Ordering::Relaxed),
            failures_suppressed: self.suppressed.load(Ordering::Relaxed),
            tracked_agents: self.last_seen.len(),
        }
    }
}
