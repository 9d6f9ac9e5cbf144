//! Health monitoring for swarm agents
//!
//! Provides:
//! - Failure classification (`failure`)
//! - Bounded failure history (`logbook`)
//! - Outbound event sinks (`beacon`)
//! - The periodic `HealthMonitor` with per-(agent, type) dedup

pub mod beacon;
pub mod failure;
pub mod logbook;
pub mod monitor;

pub use beacon::{ChannelSink, EventMetadata, EventSink, NullSink, Severity, SwarmEvent, TracingSink};
pub use failure::{Failure, FailureEvent, FailureType};
pub use logbook::FailureLog;
pub use monitor::{HealthMonitor, MonitorConfig, MonitorMetrics};
