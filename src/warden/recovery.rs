//! Recovery policy and the pluggable recovery action
//!
//! The coordinator decides *when* to try; a `RecoveryHandler` decides *how*.

use crate::agent::{AgentId, AgentState};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Recovery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Maximum recovery attempts per failure episode before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff step: attempt n waits `backoff_base_ms * n` (ms)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Silence after which the sweep marks an agent failed (ms)
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Interval between heartbeat sweeps (ms)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// The system is unhealthy once this fraction of agents is failed
    #[serde(default = "default_failed_fraction_threshold")]
    pub failed_fraction_threshold: f64,

    /// Lifecycle events kept in the coordinator's history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// How long in-flight attempts may run after shutdown starts (ms)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Hand the latest snapshot to the handler when one is available
    #[serde(default = "default_rollback_on_recovery")]
    pub rollback_on_recovery: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_failed_fraction_threshold() -> f64 {
    0.3
}

fn default_history_capacity() -> usize {
    500
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_rollback_on_recovery() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            failed_fraction_threshold: default_failed_fraction_threshold(),
            history_capacity: default_history_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            rollback_on_recovery: default_rollback_on_recovery(),
        }
    }
}

impl RecoveryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Delay before the attempt that follows `attempts` earlier ones
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        self.backoff_base() * (attempts + 1)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff_base_ms(mut self, base_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self
    }

    pub fn with_heartbeat_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.heartbeat_timeout_ms = timeout_ms;
        self
    }

    pub fn with_sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sweep_interval_ms = interval_ms;
        self
    }

    pub fn with_failed_fraction_threshold(mut self, threshold: f64) -> Self {
        self.failed_fraction_threshold = threshold;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_shutdown_grace_ms(mut self, grace_ms: u64) -> Self {
        self.shutdown_grace_ms = grace_ms;
        self
    }

    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.rollback_on_recovery = enabled;
        self
    }
}

/// What the handler is asked to do
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRequest {
    pub agent_id: AgentId,
    /// 1-based attempt number within the current failure episode
    pub attempt: u32,
    pub max_attempts: u32,
    /// Latest known-good snapshot, when rollback is enabled and one exists
    pub last_good_state: Option<AgentState>,
}

/// Result of a handler call that did not error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered,
    NotRecovered,
}

/// Error raised by a recovery handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RecoveryHandlerError {
    pub message: String,
}

impl RecoveryHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The recovery action. Runs on a blocking thread, so it may do I/O.
pub trait RecoveryHandler: Send + Sync + 'static {
    fn attempt(&self, request: &RecoveryRequest) -> Result<RecoveryOutcome, RecoveryHandlerError>;
}

impl<F> RecoveryHandler for F
where
    F: Fn(&RecoveryRequest) -> Result<RecoveryOutcome, RecoveryHandlerError> + Send + Sync + 'static,
{
    fn attempt(&self, request: &RecoveryRequest) -> Result<RecoveryOutcome, RecoveryHandlerError> {
        self(request)
    }
}

/// Handler that never recovers anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl RecoveryHandler for NoopHandler {
    fn attempt(&self, _request: &RecoveryRequest) -> Result<RecoveryOutcome, RecoveryHandlerError> {
        Ok(RecoveryOutcome::NotRecovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_config_defaults() {
        let config = RecoveryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base(), Duration::from_secs(2));
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert!((config.failed_fraction_threshold - 0.3).abs() < f64::EPSILON);
        assert!(config.rollback_on_recovery);
    }

    #[test]
    fn test_linear_backoff() {
        let config = RecoveryConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for(1), Duration::from_secs(4));
        assert_eq!(config.backoff_for(2), Duration::from_secs(6));
    }

    #[test]
    fn test_recovery_config_builders() {
        let config = RecoveryConfig::default()
            .with_max_attempts(5)
            .with_backoff_base_ms(100)
            .with_rollback(false);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_for(4), Duration::from_millis(500));
        assert!(!config.rollback_on_recovery);
    }

    #[test]
    fn test_recovery_config_deserialize() {
        let toml = r#"
max_attempts = 5
backoff_base_ms = 250
"#;
        let config: RecoveryConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base_ms, 250);
        assert_eq!(config.heartbeat_timeout_ms, 5_000);
    }

    #[test]
    fn test_closure_handler() {
        let handler = |req: &RecoveryRequest| {
            if req.attempt >= 2 {
                Ok(RecoveryOutcome::Recovered)
            } else {
                Err(RecoveryHandlerError::new("link down"))
            }
        };
        let mut req = RecoveryRequest {
            agent_id: 1,
            attempt: 1,
            max_attempts: 3,
            last_good_state: None,
        };
        assert_eq!(
            handler.attempt(&req).unwrap_err().to_string(),
            "link down"
        );
        req.attempt = 2;
        assert_eq!(handler.attempt(&req), Ok(RecoveryOutcome::Recovered));
        assert_eq!(NoopHandler.attempt(&req), Ok(RecoveryOutcome::NotRecovered));
    }
}
