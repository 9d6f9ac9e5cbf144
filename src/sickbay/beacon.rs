//! Outbound event publishing
//!
//! Every emitted failure is turned into a `SwarmEvent` and handed to an
//! `EventSink`. Detections go out under `agent_failure`; heartbeat, manual
//! and recovery bookkeeping under `agent_lifecycle`. Sinks must not block;
//! slow consumers should buffer.

use crate::agent::{AgentId, Timestamp};
use crate::sickbay::failure::{FailureEvent, FailureType};
use serde::Serialize;
use tokio::sync::mpsc;

/// Category attached to detected failures
pub const FAILURE_CATEGORY: &str = "agent_failure";

/// Category attached to heartbeat, manual and recovery events
pub const LIFECYCLE_CATEGORY: &str = "agent_lifecycle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Structured metadata for a failure event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMetadata {
    pub failure_type: FailureType,
    pub details: String,
    pub recovery_action: &'static str,
    pub is_critical: bool,
}

/// Event as seen by external consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwarmEvent {
    pub category: &'static str,
    pub subject: AgentId,
    pub message: String,
    pub severity: Severity,
    pub timestamp: Timestamp,
    pub metadata: EventMetadata,
}

impl SwarmEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&FailureEvent> for SwarmEvent {
    fn from(event: &FailureEvent) -> Self {
        let failure_type = event.failure_type();
        let details = event.details();
        let severity = if failure_type.is_critical() {
            Severity::Error
        } else if failure_type == FailureType::Recovery {
            Severity::Info
        } else {
            Severity::Warning
        };
        let category = if failure_type.is_lifecycle() {
            LIFECYCLE_CATEGORY
        } else {
            FAILURE_CATEGORY
        };
        Self {
            category,
            subject: event.agent_id,
            message: format!("Agent {} {}: {}", event.agent_id, failure_type, details),
            severity,
            timestamp: event.timestamp,
            metadata: EventMetadata {
                failure_type,
                details,
                recovery_action: failure_type.recommended_action(),
                is_critical: failure_type.is_critical(),
            },
        }
    }
}

/// Receives published events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &SwarmEvent);
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &SwarmEvent) {
        let meta = &event.metadata;
        match event.severity {
            Severity::Error => tracing::error!(
                agent = event.subject,
                failure = %meta.failure_type,
                action = meta.recovery_action,
                "{}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                agent = event.subject,
                failure = %meta.failure_type,
                action = meta.recovery_action,
                "{}",
                event.message
            ),
            Severity::Info => tracing::info!(agent = event.subject, "{}", event.message),
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &SwarmEvent) {}
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SwarmEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SwarmEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: &SwarmEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(agent = event.subject, "event receiver dropped");
        }
    }
}
