//! Failure classification
//!
//! `FailureType` is the flat discriminant used for dedup keys and counters.
//! `Failure` carries the data each kind needs; the human readable detail text
//! is rendered from it.

use crate::agent::{AgentId, AgentStatus, Timestamp, Vec2};
use serde::{Deserialize, Serialize};

/// Kind of failure, derived from a `Failure`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Timeout,
    BatteryDepleted,
    BoundaryViolation,
    SystemError,
    Collision,
    CommunicationLost,
    SensorFailure,
    Overload,
    HeartbeatTimeout,
    Manual,
    Recovery,
    RecoveryFailed,
    RecoveryError,
}

impl FailureType {
    pub const ALL: [FailureType; 13] = [
        FailureType::Timeout,
        FailureType::BatteryDepleted,
        FailureType::BoundaryViolation,
        FailureType::SystemError,
        FailureType::Collision,
        FailureType::CommunicationLost,
        FailureType::SensorFailure,
        FailureType::Overload,
        FailureType::HeartbeatTimeout,
        FailureType::Manual,
        FailureType::Recovery,
        FailureType::RecoveryFailed,
        FailureType::RecoveryError,
    ];

    /// Critical failures take the agent out of service
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            FailureType::BatteryDepleted
                | FailureType::SystemError
                | FailureType::Collision
                | FailureType::CommunicationLost
                | FailureType::HeartbeatTimeout
                | FailureType::RecoveryFailed
        )
    }

    /// Recovery action an operator or handler should take
    pub fn recommended_action(&self) -> &'static str {
        match self {
            FailureType::Timeout => "restart/reconnect",
            FailureType::BatteryDepleted => "recall for charging",
            FailureType::BoundaryViolation => "return to operating area",
            FailureType::SystemError => "restart agent software",
            FailureType::Collision => "halt and inspect for damage",
            FailureType::CommunicationLost => "re-establish communication link",
            FailureType::SensorFailure => "recalibrate or replace sensor",
            FailureType::Overload => "reduce assigned workload",
            FailureType::HeartbeatTimeout => "restart/reconnect",
            FailureType::Manual => "operator intervention",
            FailureType::Recovery => "none",
            FailureType::RecoveryFailed => "manual inspection required",
            FailureType::RecoveryError => "inspect recovery handler",
        }
    }

    /// Produced by the recovery lifecycle rather than by detection
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            FailureType::HeartbeatTimeout
                | FailureType::Manual
                | FailureType::Recovery
                | FailureType::RecoveryFailed
                | FailureType::RecoveryError
        )
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureType::Timeout => "timeout",
            FailureType::BatteryDepleted => "battery_depleted",
            FailureType::BoundaryViolation => "boundary_violation",
            FailureType::SystemError => "system_error",
            FailureType::Collision => "collision",
            FailureType::CommunicationLost => "communication_lost",
            FailureType::SensorFailure => "sensor_failure",
            FailureType::Overload => "overload",
            FailureType::HeartbeatTimeout => "heartbeat_timeout",
            FailureType::Manual => "manual",
            FailureType::Recovery => "recovery",
            FailureType::RecoveryFailed => "recovery_failed",
            FailureType::RecoveryError => "recovery_error",
        };
        write!(f, "{}", s)
    }
}

/// A classified failure with the data specific to its kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// No state update for `silent_ms`
    Timeout { silent_ms: i64 },
    BatteryDepleted { level: f64 },
    BoundaryViolation { position: Vec2 },
    /// The agent reported a failed status of its own
    SystemError { status: AgentStatus },
    Collision { with: Option<AgentId> },
    CommunicationLost { reason: String },
    SensorFailure { sensor: String },
    /// Load as a percentage of capacity
    Overload { load: f64 },
    HeartbeatTimeout { silent_ms: i64 },
    Manual { reason: String },
    Recovery { message: String },
    RecoveryFailed { attempts: u32 },
    RecoveryError { error: String },
}

impl Failure {
    pub fn failure_type(&self) -> FailureType {
        match self {
            Failure::Timeout { .. } => FailureType::Timeout,
            Failure::BatteryDepleted { .. } => FailureType::BatteryDepleted,
            Failure::BoundaryViolation { .. } => FailureType::BoundaryViolation,
            Failure::SystemError { .. } => FailureType::SystemError,
            Failure::Collision { .. } => FailureType::Collision,
            Failure::CommunicationLost { .. } => FailureType::CommunicationLost,
            Failure::SensorFailure { .. } => FailureType::SensorFailure,
            Failure::Overload { .. } => FailureType::Overload,
            Failure::HeartbeatTimeout { .. } => FailureType::HeartbeatTimeout,
            Failure::Manual { .. } => FailureType::Manual,
            Failure::Recovery { .. } => FailureType::Recovery,
            Failure::RecoveryFailed { .. } => FailureType::RecoveryFailed,
            Failure::RecoveryError { .. } => FailureType::RecoveryError,
        }
    }

    /// Free text description
    pub fn details(&self) -> String {
        match self {
            Failure::Timeout { silent_ms } => {
                format!("unresponsive for {}", seconds(*silent_ms))
            }
            Failure::BatteryDepleted { level } => format!("battery depleted ({:.1}%)", level),
            Failure::BoundaryViolation { position } => format!(
                "position ({:.2}, {:.2}) outside operating area",
                position.x, position.y
            ),
            Failure::SystemError { status } => format!("agent reported {} status", status),
            Failure::Collision { with: Some(other) } => format!("collision with agent {}", other),
            Failure::Collision { with: None } => "collision detected".to_string(),
            Failure::CommunicationLost { reason } => reason.clone(),
            Failure::SensorFailure { sensor } => format!("sensor '{}' failed", sensor),
            Failure::Overload { load } => format!("load at {:.1}% of capacity", load),
            Failure::HeartbeatTimeout { silent_ms } => {
                format!("no heartbeat for {}", seconds(*silent_ms))
            }
            Failure::Manual { reason } => reason.clone(),
            Failure::Recovery { message } => message.clone(),
            Failure::RecoveryFailed { attempts } => {
                format!("max recovery attempts reached ({})", attempts)
            }
            Failure::RecoveryError { error } => format!("recovery handler error: {}", error),
        }
    }
}

fn seconds(ms: i64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

/// An immutable record of one emitted failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEvent {
    pub timestamp: Timestamp,
    pub agent_id: AgentId,
    pub failure: Failure,
}

impl FailureEvent {
    pub fn new(timestamp: Timestamp, agent_id: AgentId, failure: Failure) -> Self {
        Self {
            timestamp,
            agent_id,
            failure,
        }
    }

    pub fn failure_type(&self) -> FailureType {
        self.failure.failure_type()
    }

    pub fn details(&self) -> String {
        self.failure.details()
    }

    pub fn is_critical(&self) -> bool {
        self.failure_type().is_critical()
    }

    pub fn recommended_action(&self) -> &'static str {
        self.failure_type().recommended_action()
    }
}
