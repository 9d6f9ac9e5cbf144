//! Recovery coordination
//!
//! Owns one `HealthRecord` per agent and drives the lifecycle
//! `Unknown -> Active -> Failed -> Recovering -> Active` (plus `Degraded`).
//! Every transition for an agent happens under that agent's record lock;
//! events and scheduling happen after the lock is released.

use crate::agent::{AgentId, Timestamp, now_millis};
use crate::sickbay::{EventSink, Failure, FailureEvent, FailureLog, FailureType, SwarmEvent, TracingSink};
use crate::registry::AgentTable;
use crate::snapshot::SnapshotStore;
use crate::warden::health::{AgentHealthRecord, HealthRecord, HealthState, HeartbeatOutcome, ScheduleDecision};
use crate::warden::recovery::{RecoveryConfig, RecoveryHandler, RecoveryOutcome, RecoveryRequest};
use crate::warden::scheduler::{PendingAttempt, SchedulerHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// How a recovery attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Recovered,
    NotRecovered,
    /// The handler returned an error or panicked
    Errored(String),
}

impl From<RecoveryOutcome> for AttemptResult {
    fn from(outcome: RecoveryOutcome) -> Self {
        match outcome {
            RecoveryOutcome::Recovered => AttemptResult::Recovered,
            RecoveryOutcome::NotRecovered => AttemptResult::NotRecovered,
        }
    }
}

/// Counters exposed by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryMetrics {
    pub attempts_scheduled: u64,
    pub attempts_started: u64,
    pub recovered: u64,
    pub not_recovered: u64,
    pub errored: u64,
    pub exhausted: u64,
    pub tracked_agents: usize,
    pub failed_agents: usize,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    started: AtomicU64,
    recovered: AtomicU64,
    not_recovered: AtomicU64,
    errored: AtomicU64,
    exhausted: AtomicU64,
}

/// Tracks agent health and drives bounded recovery
pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    records: AgentTable<HealthRecord>,
    history: FailureLog,
    handler: Arc<dyn RecoveryHandler>,
    scheduler: SchedulerHandle,
    snapshots: Option<Arc<SnapshotStore>>,
    sink: Arc<dyn EventSink>,
    accepting: AtomicBool,
    counters: Counters,
}

impl RecoveryCoordinator {
    pub fn new(
        config: RecoveryConfig,
        handler: Arc<dyn RecoveryHandler>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            history: FailureLog::new(config.history_capacity),
            config,
            records: AgentTable::new(),
            handler,
            scheduler,
            snapshots: None,
            sink: Arc::new(TracingSink),
            accepting: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    /// Attach a snapshot store used for rollback on recovery
    pub fn with_snapshots(mut self, store: Arc<SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn handler(&self) -> Arc<dyn RecoveryHandler> {
        Arc::clone(&self.handler)
    }

    // --- lifecycle -------------------------------------------------------

    /// Start tracking an agent as Active. Returns false if it was already tracked.
    pub fn register(&self, agent_id: AgentId) -> bool {
        self.register_at(agent_id, now_millis())
    }

    pub fn register_at(&self, agent_id: AgentId, now: Timestamp) -> bool {
        let created = self
            .records
            .with_or_create(agent_id, || HealthRecord::new(now), |record, created| {
                record.activate(now);
                created
            });
        if created {
            tracing::info!(agent = agent_id, "agent registered");
        }
        created
    }

    /// Stop tracking an agent; queued attempts for it are dropped when they fire
    pub fn unregister(&self, agent_id: AgentId) -> bool {
        let removed = self.records.remove(agent_id);
        if removed {
            tracing::info!(agent = agent_id, "agent unregistered");
        }
        removed
    }

    pub fn heartbeat(&self, agent_id: AgentId) -> HeartbeatOutcome {
        self.heartbeat_at(agent_id, now_millis())
    }

    /// Record a heartbeat, registering the agent on first contact
    pub fn heartbeat_at(&self, agent_id: AgentId, now: Timestamp) -> HeartbeatOutcome {
        let outcome = self
            .records
            .with_or_create(agent_id, || HealthRecord::new(now), |record, _| record.heartbeat(now));

        match outcome {
            HeartbeatOutcome::Registered => {
                tracing::info!(agent = agent_id, "agent registered on first heartbeat");
            }
            HeartbeatOutcome::Revived => {
                tracing::info!(agent = agent_id, "heartbeat from failed agent, recovering");
                self.record(FailureEvent::new(
                    now,
                    agent_id,
                    Failure::Recovery {
                        message: "agent recovered".to_string(),
                    },
                ));
            }
            HeartbeatOutcome::Restored | HeartbeatOutcome::Stabilized => {
                tracing::debug!(agent = agent_id, ?outcome, "agent back to active");
            }
            HeartbeatOutcome::Refreshed => {}
        }
        outcome
    }

    pub fn mark_agent_failed(&self, agent_id: AgentId, reason: impl Into<String>) -> bool {
        self.mark_agent_failed_at(agent_id, reason, now_millis())
    }

    /// Force an agent into Failed. Recovery is scheduled only when it was not
    /// already Failed. Returns whether the agent entered Failed.
    pub fn mark_agent_failed_at(
        &self,
        agent_id: AgentId,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> bool {
        let reason = reason.into();
        let (entered, decision) = self.records.with_or_create(
            agent_id,
            || HealthRecord::new(now),
            |record, _| self.fail_record(record, now),
        );

        tracing::warn!(agent = agent_id, reason = %reason, "agent marked failed");
        self.record(FailureEvent::new(now, agent_id, Failure::Manual { reason }));
        if let Some(decision) = decision {
            self.dispatch(agent_id, decision, now);
        }
        entered
    }

    /// Mark every non-failed agent silent for longer than the heartbeat
    /// timeout as Failed. Returns the agents that failed in this sweep.
    pub fn check_heartbeats(&self, now: Timestamp) -> Vec<AgentId> {
        let timeout = self.config.heartbeat_timeout_ms as i64;
        let mut failed = Vec::new();

        for (agent_id, entry) in self.records.entries() {
            let outcome = {
                let mut record = entry.lock();
                let silent_ms = now.saturating_sub(record.last_heartbeat);
                match record.state() {
                    HealthState::Failed | HealthState::Unknown => None,
                    _ if silent_ms > timeout => {
                        let (_, decision) = self.fail_record(&mut record, now);
                        Some((silent_ms, decision))
                    }
                    _ => None,
                }
            };

            if let Some((silent_ms, decision)) = outcome {
                tracing::warn!(agent = agent_id, silent_ms, "heartbeat timeout");
                self.record(FailureEvent::new(
                    now,
                    agent_id,
                    Failure::HeartbeatTimeout { silent_ms },
                ));
                if let Some(decision) = decision {
                    self.dispatch(agent_id, decision, now);
                }
                failed.push(agent_id);
            }
        }

        failed.sort_unstable();
        failed
    }

    /// React to a failure detected by the monitor. Critical failures fail the
    /// agent; other detections degrade an Active agent. Lifecycle events and
    /// untracked agents are ignored.
    pub fn on_failure(&self, event: &FailureEvent) {
        let failure_type = event.failure_type();
        if failure_type.is_lifecycle() {
            return;
        }
        let now = event.timestamp;

        let outcome = self.records.with(event.agent_id, |record| {
            if event.is_critical() {
                self.fail_record(record, now).1
            } else {
                if record.degrade(now) {
                    tracing::info!(agent = event.agent_id, failure = %failure_type, "agent degraded");
                }
                None
            }
        });

        match outcome {
            None => {
                tracing::trace!(agent = event.agent_id, failure = %failure_type, "failure for untracked agent");
            }
            Some(Some(decision)) => {
                tracing::warn!(agent = event.agent_id, failure = %failure_type, "critical failure, agent failed");
                self.dispatch(event.agent_id, decision, now);
            }
            Some(None) => {}
        }
    }

    // --- recovery attempts -----------------------------------------------

    /// Validate a due attempt and build the handler request. Returns `None`
    /// when the attempt is stale (agent gone, recovered, or a newer episode)
    /// or the coordinator is shutting down.
    pub fn begin_attempt(&self, pending: &PendingAttempt) -> Option<RecoveryRequest> {
        if !self.is_accepting() {
            return None;
        }
        let current = self
            .records
            .with(pending.agent_id, |record| {
                record.state() == HealthState::Failed
                    && record.episode == pending.episode
                    && record.recovery_attempts == pending.attempt
            })
            .unwrap_or(false);
        if !current {
            tracing::debug!(agent = pending.agent_id, attempt = pending.attempt, "stale recovery attempt dropped");
            return None;
        }

        let last_good_state = match (&self.snapshots, self.config.rollback_on_recovery) {
            (Some(store), true) => store.restore_latest_snapshot(pending.agent_id),
            _ => None,
        };

        self.counters.started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            agent = pending.agent_id,
            attempt = pending.attempt,
            max = self.config.max_attempts,
            rollback = last_good_state.is_some(),
            "starting recovery attempt"
        );
        Some(RecoveryRequest {
            agent_id: pending.agent_id,
            attempt: pending.attempt,
            max_attempts: self.config.max_attempts,
            last_good_state,
        })
    }

    /// Apply the result of an attempt started for `episode`
    pub fn complete_attempt(&self, agent_id: AgentId, episode: u64, result: AttemptResult) {
        let now = now_millis();
        let max_attempts = self.config.max_attempts;
        let base = self.config.backoff_base();
        let accepting = self.is_accepting();

        let applied = self.records.with(agent_id, |record| {
            if record.state() != HealthState::Failed || record.episode != episode {
                return None;
            }
            let attempt = record.recovery_attempts;
            match &result {
                AttemptResult::Recovered => {
                    record.resume();
                    Some((attempt, None))
                }
                _ if accepting => Some((attempt, Some(record.next_attempt(max_attempts, base)))),
                _ => Some((attempt, None)),
            }
        });

        let Some(Some((attempt, decision))) = applied else {
            tracing::debug!(agent = agent_id, episode, "attempt result for stale episode ignored");
            return;
        };

        match result {
            AttemptResult::Recovered => {
                self.counters.recovered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(agent = agent_id, attempt, "recovery succeeded");
                self.record(FailureEvent::new(
                    now,
                    agent_id,
                    Failure::Recovery {
                        message: format!("recovered on attempt {}", attempt),
                    },
                ));
            }
            AttemptResult::NotRecovered => {
                self.counters.not_recovered.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(agent = agent_id, attempt, "recovery attempt did not recover agent");
            }
            AttemptResult::Errored(error) => {
                self.counters.errored.fetch_add(1, Ordering::Relaxed);
                tracing::error!(agent = agent_id, attempt, error = %error, "recovery handler error");
                self.record(FailureEvent::new(now, agent_id, Failure::RecoveryError { error }));
            }
        }

        if let Some(decision) = decision {
            self.dispatch(agent_id, decision, now);
        }
    }

    /// Run a due attempt inline on the calling thread
    pub fn run_attempt(&self, pending: &PendingAttempt) -> Option<AttemptResult> {
        let request = self.begin_attempt(pending)?;
        let result = match self.handler.attempt(&request) {
            Ok(outcome) => AttemptResult::from(outcome),
            Err(e) => AttemptResult::Errored(e.to_string()),
        };
        self.complete_attempt(pending.agent_id, pending.episode, result.clone());
        Some(result)
    }

    /// Refuse new attempts and stop the scheduler
    pub fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!("recovery coordinator no longer accepting attempts");
            self.scheduler.shutdown();
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Move a record to Failed and, if it just entered Failed, reserve the
    /// first attempt of the episode
    fn fail_record(&self, record: &mut HealthRecord, now: Timestamp) -> (bool, Option<ScheduleDecision>) {
        let entered = record.fail(now);
        if entered && self.is_accepting() {
            let decision = record.next_attempt(self.config.max_attempts, self.config.backoff_base());
            (entered, Some(decision))
        } else {
            (entered, None)
        }
    }

    fn dispatch(&self, agent_id: AgentId, decision: ScheduleDecision, now: Timestamp) {
        match decision {
            ScheduleDecision::Attempt {
                attempt,
                delay,
                episode,
            } => {
                let pending = PendingAttempt {
                    agent_id,
                    episode,
                    attempt,
                };
                match self.scheduler.schedule(pending, delay) {
                    Ok(()) => {
                        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(
                            agent = agent_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "recovery attempt scheduled"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(agent = agent_id, attempt, error = %e, "could not schedule recovery");
                    }
                }
            }
            ScheduleDecision::Exhausted { attempts } => {
                self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                tracing::error!(agent = agent_id, attempts, "max recovery attempts reached");
                self.record(FailureEvent::new(
                    now,
                    agent_id,
                    Failure::RecoveryFailed { attempts },
                ));
            }
        }
    }

    fn record(&self, event: FailureEvent) {
        self.sink.publish(&SwarmEvent::from(&event));
        self.history.record(event);
    }

    // --- queries -----------------------------------------------------------

    /// Current state; `Unknown` for untracked agents
    pub fn agent_status(&self, agent_id: AgentId) -> HealthState {
        self.records
            .with(agent_id, |record| record.state())
            .unwrap_or(HealthState::Unknown)
    }

    pub fn agent_record(&self, agent_id: AgentId) -> Option<AgentHealthRecord> {
        self.records.with(agent_id, |record| record.view(agent_id))
    }

    pub fn agents_with_status(&self, status: HealthState) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .records
            .entries()
            .into_iter()
            .filter(|(_, entry)| entry.lock().state() == status)
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn tracked_agents(&self) -> Vec<AgentId> {
        let mut ids = self.records.ids();
        ids.sort_unstable();
        ids
    }

    /// Healthy when nothing is tracked or the failed fraction is below the
    /// configured threshold
    pub fn is_system_healthy(&self) -> bool {
        let total = self.records.len();
        if total == 0 {
            return true;
        }
        let failed = self.agents_with_status(HealthState::Failed).len();
        (failed as f64 / total as f64) < self.config.failed_fraction_threshold
    }

    /// Last `n` lifecycle events, oldest first
    pub fn recent_failures(&self, n: usize) -> Vec<FailureEvent> {
        self.history.recent(n)
    }

    pub fn failures_for(&self, agent_id: AgentId) -> Vec<FailureEvent> {
        self.history.for_agent(agent_id)
    }

    pub fn failure_counts(&self) -> BTreeMap<FailureType, usize> {
        self.history.counts_by_type()
    }

    pub fn metrics(&self) -> RecoveryMetrics {
        RecoveryMetrics {
            attempts_scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            attempts_started: self.counters.started.load(Ordering::Relaxed),
            recovered: self.counters.recovered.load(Ordering::Relaxed),
            not_recovered: self.counters.not_recovered.load(Ordering::Relaxed),
            errored: self.counters.errored.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            tracked_agents: self.records.len(),
            failed_agents: self.agents_with_status(HealthState::Failed).len(),
        }
    }
}
