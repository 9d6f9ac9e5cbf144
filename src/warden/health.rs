//! Agent health state machine
//!
//! Type-safe lifecycle for a single agent's health using the state-machines
//! crate in dynamic mode, plus the record the coordinator keeps per agent.

use crate::agent::{AgentId, Timestamp};
use serde::Serialize;
use state_machines::state_machine;
use std::time::Duration;

state_machine! {
    name: HealthMachine,
    dynamic: true,
    initial: Unknown,
    states: [Unknown, Active, Degraded, Recovering, Failed],
    events {
        activate {
            transition: { from: Unknown, to: Active }
        }
        degrade {
            transition: { from: Active, to: Degraded }
        }
        restore {
            transition: { from: Degraded, to: Active }
        }
        fail {
            transition: { from: [Unknown, Active, Degraded, Recovering], to: Failed }
        }
        revive {
            transition: { from: Failed, to: Recovering }
        }
        stabilize {
            transition: { from: Recovering, to: Active }
        }
    }
}

/// Health state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HealthState {
    Unknown,
    Active,
    Degraded,
    Recovering,
    Failed,
}

impl HealthState {
    /// Parse the machine's state name
    pub fn from_name(s: &str) -> Self {
        match s {
            "Active" => HealthState::Active,
            "Degraded" => HealthState::Degraded,
            "Recovering" => HealthState::Recovering,
            "Failed" => HealthState::Failed,
            _ => HealthState::Unknown,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Active => write!(f, "active"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Recovering => write!(f, "recovering"),
            HealthState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of applying a heartbeat to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Unknown -> Active
    Registered,
    /// Active, timestamp refresh only
    Refreshed,
    /// Degraded -> Active
    Restored,
    /// Failed -> Recovering
    Revived,
    /// Recovering -> Active
    Stabilized,
}

/// What to do after the agent entered or stayed in Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Run attempt number `attempt` after `delay`
    Attempt {
        attempt: u32,
        delay: Duration,
        episode: u64,
    },
    /// The cap was reached
    Exhausted { attempts: u32 },
}

/// Read-only view of an agent's health record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentHealthRecord {
    pub agent_id: AgentId,
    pub status: HealthState,
    pub last_heartbeat_at: Timestamp,
    pub recovery_attempts: u32,
    pub last_failure_at: Option<Timestamp>,
}

/// Mutable per-agent health record owned by the coordinator
pub struct HealthRecord {
    machine: DynamicHealthMachine<()>,
    pub last_heartbeat: Timestamp,
    pub recovery_attempts: u32,
    pub last_failure: Option<Timestamp>,
    /// Bumped every time the agent leaves Failed; scheduled attempts carry the
    /// episode they were created for
    pub episode: u64,
}

impl HealthRecord {
    pub fn new(now: Timestamp) -> Self {
        Self {
            machine: HealthMachine::new(()).into_dynamic(),
            last_heartbeat: now,
            recovery_attempts: 0,
            last_failure: None,
            episode: 0,
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from_name(self.machine.current_state())
    }

    pub fn view(&self, agent_id: AgentId) -> AgentHealthRecord {
        AgentHealthRecord {
            agent_id,
            status: self.state(),
            last_heartbeat_at: self.last_heartbeat,
            recovery_attempts: self.recovery_attempts,
            last_failure_at: self.last_failure,
        }
    }

    fn fire(&mut self, event: HealthMachineEvent) {
        let from = self.state();
        if let Err(e) = self.machine.handle(event) {
            tracing::error!(state = %from, error = ?e, "invalid health transition");
        }
    }

    /// Unknown -> Active; no-op otherwise
    pub fn activate(&mut self, now: Timestamp) -> bool {
        if self.state() != HealthState::Unknown {
            return false;
        }
        self.fire(HealthMachineEvent::Activate);
        self.last_heartbeat = now;
        self.recovery_attempts = 0;
        true
    }

    /// Apply a heartbeat received at `now`
    pub fn heartbeat(&mut self, now: Timestamp) -> HeartbeatOutcome {
        self.last_heartbeat = now;
        match self.state() {
            HealthState::Unknown => {
                self.fire(HealthMachineEvent::Activate);
                self.recovery_attempts = 0;
                HeartbeatOutcome::Registered
            }
            HealthState::Active => HeartbeatOutcome::Refreshed,
            HealthState::Degraded => {
                self.fire(HealthMachineEvent::Restore);
                self.recovery_attempts = 0;
                HeartbeatOutcome::Restored
            }
            HealthState::Failed => {
                self.revive();
                HeartbeatOutcome::Revived
            }
            HealthState::Recovering => {
                self.fire(HealthMachineEvent::Stabilize);
                self.recovery_attempts = 0;
                HeartbeatOutcome::Stabilized
            }
        }
    }

    /// Active -> Degraded; no-op otherwise
    pub fn degrade(&mut self, now: Timestamp) -> bool {
        if self.state() != HealthState::Active {
            return false;
        }
        self.fire(HealthMachineEvent::Degrade);
        self.last_failure = Some(now);
        true
    }

    /// Any -> Failed. Returns true if the agent was not already Failed.
    pub fn fail(&mut self, now: Timestamp) -> bool {
        self.last_failure = Some(now);
        if self.state() == HealthState::Failed {
            return false;
        }
        self.fire(HealthMachineEvent::Fail);
        true
    }

    /// Failed -> Recovering, starting a fresh attempt budget
    pub fn revive(&mut self) -> bool {
        if self.state() != HealthState::Failed {
            return false;
        }
        self.fire(HealthMachineEvent::Revive);
        self.recovery_attempts = 0;
        self.episode += 1;
        true
    }

    /// Failed -> Recovering after a handler reported success. The attempt
    /// counter and episode carry over until a heartbeat confirms the agent.
    pub fn resume(&mut self) -> bool {
        if self.state() != HealthState::Failed {
            return false;
        }
        self.fire(HealthMachineEvent::Revive);
        true
    }

    /// Reserve the next recovery attempt, or report the cap as reached.
    /// The counter is incremented before the attempt runs.
    pub fn next_attempt(&mut self, max_attempts: u32, backoff_base: Duration) -> ScheduleDecision {
        if self.recovery_attempts >= max_attempts {
            return ScheduleDecision::Exhausted {
                attempts: self.recovery_attempts,
            };
        }
        let delay = backoff_base * (self.recovery_attempts + 1);
        self.recovery_attempts += 1;
        ScheduleDecision::Attempt {
            attempt: self.recovery_attempts,
            delay,
            episode: self.episode,
        }
    }
}
