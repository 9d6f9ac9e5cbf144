//! Runtime wiring
//!
//! `Fleet` builds the monitor, the recovery coordinator and the snapshot store
//! from one `FlotillaConfig`, then runs the tick loop and the Warden on the
//! current tokio runtime until `shutdown` is called.

use crate::agent::{AgentId, AgentStateSource, BoundaryValidator, Timestamp, now_millis};
use crate::error::{Error, Result};
use crate::manifest::FlotillaConfig;
use crate::sickbay::{EventSink, HealthMonitor, TracingSink};
use crate::snapshot::{SnapshotId, SnapshotStore};
use crate::warden::{
    HeartbeatOutcome, NoopHandler, RecoveryCoordinator, RecoveryHandler, SchedulerHandle, Warden, WardenHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Collects collaborators before the fleet starts
pub struct FleetBuilder {
    config: FlotillaConfig,
    source: Option<Arc<dyn AgentStateSource>>,
    validator: Option<Arc<dyn BoundaryValidator>>,
    handler: Option<Arc<dyn RecoveryHandler>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl FleetBuilder {
    pub fn new(config: FlotillaConfig) -> Self {
        Self {
            config,
            source: None,
            validator: None,
            handler: None,
            sink: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn AgentStateSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn BoundaryValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and spawn the background tasks.
    /// Must be called from inside a tokio runtime.
    pub fn start(self) -> Result<Fleet> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::InvalidInput("fleet must be started inside a tokio runtime".into()))?;
        self.config.validate()?;

        let FleetBuilder {
            config,
            source,
            validator,
            handler,
            sink,
        } = self;
        let sink = sink.unwrap_or_else(|| Arc::new(TracingSink));
        let handler = handler.unwrap_or_else(|| {
            tracing::warn!("no recovery handler configured, attempts will never recover agents");
            Arc::new(NoopHandler)
        });

        let snapshots = Arc::new(SnapshotStore::new(config.snapshots.clone()));

        let mut monitor = HealthMonitor::new(config.monitor.clone()).with_sink(Arc::clone(&sink));
        if let Some(source) = &source {
            monitor = monitor.with_source(Arc::clone(source));
        }
        if let Some(validator) = validator {
            monitor = monitor.with_validator(validator);
        }
        let monitor = Arc::new(monitor);

        let (scheduler, commands) = SchedulerHandle::channel();
        let coordinator = Arc::new(
            RecoveryCoordinator::new(config.recovery.clone(), handler, scheduler)
                .with_snapshots(Arc::clone(&snapshots))
                .with_sink(sink),
        );

        let warden = Warden::new(Arc::clone(&coordinator), commands).with_failure_feed(monitor.subscribe());
        let warden_handle = warden.handle();
        let warden_task = runtime.spawn(warden.run());

        let (stop, stop_rx) = watch::channel(false);
        let ticker = if source.is_some() {
            Some(runtime.spawn(tick_loop(
                Arc::clone(&monitor),
                config.monitor.tick_interval(),
                stop_rx,
            )))
        } else {
            tracing::info!("no agent state source attached, failure detection disabled");
            None
        };

        tracing::info!(
            tick_ms = config.monitor.tick_interval_ms,
            sweep_ms = config.recovery.sweep_interval_ms,
            "fleet started"
        );

        Ok(Fleet {
            config,
            source,
            monitor,
            coordinator,
            snapshots,
            warden: warden_handle,
            warden_task,
            ticker,
            stop,
        })
    }
}

async fn tick_loop(monitor: Arc<HealthMonitor>, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => match monitor.tick(now_millis()) {
                Ok(0) => {}
                Ok(emitted) => tracing::debug!(emitted, "monitor tick"),
                Err(e) => {
                    tracing::error!(error = %e, "monitor tick failed, stopping detection");
                    break;
                }
            },
        }
    }
}

/// A running control plane
pub struct Fleet {
    config: FlotillaConfig,
    source: Option<Arc<dyn AgentStateSource>>,
    monitor: Arc<HealthMonitor>,
    coordinator: Arc<RecoveryCoordinator>,
    snapshots: Arc<SnapshotStore>,
    warden: WardenHandle,
    warden_task: JoinHandle<()>,
    ticker: Option<JoinHandle<()>>,
    stop: watch::Sender<bool>,
}

impl Fleet {
    pub fn builder(config: FlotillaConfig) -> FleetBuilder {
        FleetBuilder::new(config)
    }

    pub fn config(&self) -> &FlotillaConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<RecoveryCoordinator> {
        &self.coordinator
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn register(&self, agent_id: AgentId) -> bool {
        self.coordinator.register(agent_id)
    }

    pub fn heartbeat(&self, agent_id: AgentId) -> HeartbeatOutcome {
        self.coordinator.heartbeat(agent_id)
    }

    pub fn is_system_healthy(&self) -> bool {
        self.coordinator.is_system_healthy()
    }

    pub fn capture(&self) -> Result<SnapshotId> {
        self.capture_at(now_millis())
    }

    /// Snapshot every agent the source reports, then the whole system.
    /// Returns the system snapshot id.
    pub fn capture_at(&self, now: Timestamp) -> Result<SnapshotId> {
        let source = self.source.as_ref().ok_or(Error::DetectionUnavailable)?;
        let states = source.current_states();
        for state in &states {
            self.snapshots.create_snapshot_at(state.id, state, now)?;
        }
        let id = self.snapshots.create_system_snapshot_at(now);
        tracing::debug!(agents = states.len(), snapshot = %id, "fleet state captured");
        Ok(id)
    }

    /// Stop detection and recovery; in-flight attempts get the configured
    /// grace period
    pub async fn shutdown(self) {
        tracing::info!("fleet shutting down");
        self.stop.send_replace(true);
        if self.warden.shutdown().is_err() {
            tracing::debug!("warden shutdown already requested");
        }

        if let Some(ticker) = self.ticker {
            if let Err(e) = ticker.await {
                tracing::error!(error = %e, "tick loop failed");
            }
        }
        if let Err(e) = self.warden_task.await {
            tracing::error!(error = %e, "warden task failed");
        }
        tracing::info!("fleet stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentState, SimulatedSource};
    use crate::sickbay::{FailureType, NullSink};
    use crate::warden::{HealthState, RecoveryHandlerError, RecoveryOutcome, RecoveryRequest};
    use parking_lot::Mutex;

    fn fast_config() -> FlotillaConfig {
        let mut config = FlotillaConfig::default();
        config.monitor = config.monitor.with_tick_interval_ms(5);
        config.recovery = config
            .recovery
            .with_backoff_base_ms(10)
            .with_sweep_interval_ms(5)
            .with_shutdown_grace_ms(100);
        config
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_start_requires_runtime() {
        let result = Fleet::builder(FlotillaConfig::default()).start();
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_detected_failure_is_recovered_with_rollback() {
        let source = Arc::new(SimulatedSource::new());
        source.upsert(AgentState::new(1, "scout").battery(80.0));

        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let handler = move |req: &RecoveryRequest| -> std::result::Result<RecoveryOutcome, RecoveryHandlerError> {
            seen.lock().push(req.clone());
            Ok(RecoveryOutcome::Recovered)
        };

        let fleet = Fleet::builder(fast_config())
            .with_source(source.clone())
            .with_handler(Arc::new(handler))
            .with_sink(Arc::new(NullSink))
            .start()
            .unwrap();
        fleet.register(1);
        fleet.capture().unwrap();

        source.update(1, |state| state.battery = 0.0);
        wait_for(|| fleet.coordinator().metrics().recovered == 1).await;

        assert_eq!(fleet.coordinator().agent_status(1), HealthState::Recovering);
        assert_eq!(fleet.monitor().failure_counts().get(&FailureType::BatteryDepleted), Some(&1));
        let requests = requests.lock().clone();
        assert_eq!(requests.len(), 1);
        let rollback = requests[0].last_good_state.as_ref().unwrap();
        assert_eq!(rollback.battery, 80.0);

        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_capture_snapshots_every_agent() {
        let source = Arc::new(SimulatedSource::new());
        for id in 1..=3 {
            source.upsert(AgentState::new(id, format!("agent-{}", id)));
        }
        let fleet = Fleet::builder(fast_config())
            .with_source(source)
            .with_sink(Arc::new(NullSink))
            .start()
            .unwrap();

        let id = fleet.capture_at(1_000).unwrap();
        let system = fleet.snapshots().restore_system_snapshot(id).unwrap();
        assert_eq!(system.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(fleet.snapshots().snapshot_count(2), 1);

        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_fleet_without_source() {
        let fleet = Fleet::builder(fast_config())
            .with_sink(Arc::new(NullSink))
            .start()
            .unwrap();
        assert!(matches!(fleet.capture(), Err(Error::DetectionUnavailable)));
        assert!(fleet.is_system_healthy());
        assert_eq!(fleet.heartbeat(4), HeartbeatOutcome::Registered);
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = FlotillaConfig::default();
        config.snapshots.agent_capacity = 0;
        let result = Fleet::builder(config).start();
        assert!(matches!(result, Err(Error::ConfigValidation(_))));
    }
}
