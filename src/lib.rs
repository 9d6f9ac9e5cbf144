//! Flotilla - swarm control plane
//!
//! Health monitoring, bounded automated recovery, and state snapshots for
//! fleets of independently moving agents.

pub mod agent;
pub mod error;
pub mod fleet;
pub mod manifest;
pub mod registry;
pub mod sickbay;
pub mod snapshot;
pub mod warden;

pub use agent::{AgentId, AgentState, AgentStateSource, AgentStatus, BoundaryValidator, Timestamp, Vec2};
pub use error::{Error, Result};
pub use fleet::{Fleet, FleetBuilder};
pub use manifest::FlotillaConfig;
pub use sickbay::{EventSink, FailureEvent, FailureType, HealthMonitor};
pub use snapshot::{SnapshotId, SnapshotStore};
pub use warden::{HealthState, RecoveryCoordinator, RecoveryHandler, Warden};
