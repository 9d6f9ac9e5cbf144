//! Agent state types

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Numeric agent identifier (4 bytes on the wire)
pub type AgentId = u32;

/// Milliseconds since the UNIX epoch
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

/// Two-dimensional vector used for position and velocity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Operational status reported by the agent itself
///
/// This is the agent's own view, set by the runtime that drives it. The
/// control plane's health lifecycle lives in `warden::HealthState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgentStatus {
    #[default]
    Idle,
    Active,
    Returning,
    Charging,
    Failed,
}

impl AgentStatus {
    /// Name used in the snapshot encoding
    pub fn name(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "IDLE",
            AgentStatus::Active => "ACTIVE",
            AgentStatus::Returning => "RETURNING",
            AgentStatus::Charging => "CHARGING",
            AgentStatus::Failed => "FAILED",
        }
    }

    /// Parse a status name, `None` if unknown
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "IDLE" => Some(AgentStatus::Idle),
            "ACTIVE" => Some(AgentStatus::Active),
            "RETURNING" => Some(AgentStatus::Returning),
            "CHARGING" => Some(AgentStatus::Charging),
            "FAILED" => Some(AgentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Point-in-time state of a single agent
///
/// Battery is a percentage in `0.0..=100.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub name: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub heading: f64,
    pub max_speed: f64,
    pub max_turn_rate: f64,
    pub communication_range: f64,
    pub status: AgentStatus,
    pub battery: f64,
    pub last_update: Timestamp,
}

impl AgentState {
    pub fn new(id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            position: Vec2::default(),
            velocity: Vec2::default(),
            heading: 0.0,
            max_speed: 10.0,
            max_turn_rate: 1.0,
            communication_range: 100.0,
            status: AgentStatus::Active,
            battery: 100.0,
            last_update: now_millis(),
        }
    }

    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.position = Vec2::new(x, y);
        self
    }

    pub fn velocity(mut self, x: f64, y: f64) -> Self {
        self.velocity = Vec2::new(x, y);
        self
    }

    pub fn heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    pub fn status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn battery(mut self, battery: f64) -> Self {
        self.battery = battery;
        self
    }

    pub fn updated_at(mut self, last_update: Timestamp) -> Self {
        self.last_update = last_update;
        self
    }
}
