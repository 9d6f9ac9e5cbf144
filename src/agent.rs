//! Agent state and the collaborator interfaces that feed it
//!
//! This module provides:
//! - The per-agent state captured by monitoring and snapshots
//! - The `AgentStateSource` capability with simulated and external-feed variants
//! - The optional `BoundaryValidator` used by the boundary check

pub mod source;
pub mod state;

// Re-exports
pub use source::{AgentStateSource, BoundaryValidator, FeedSource, RectBoundary, SimulatedSource};
pub use state::{AgentId, AgentState, AgentStatus, Timestamp, Vec2, now_millis};
