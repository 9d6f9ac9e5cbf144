//! The Warden - recovery supervisor
//!
//! Drives a `RecoveryCoordinator` in the background:
//! - Sweeps heartbeats on a fixed interval
//! - Forwards monitor failures into the coordinator
//! - Runs due recovery attempts on blocking threads, one-for-one
//! - On shutdown, gives in-flight attempts a bounded grace period

pub mod coordinator;
pub mod health;
pub mod recovery;
pub mod scheduler;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::agent::now_millis;
use crate::error::{Error, Result};
use crate::sickbay::FailureEvent;

pub use coordinator::{AttemptResult, RecoveryCoordinator, RecoveryMetrics};
pub use health::{AgentHealthRecord, HealthState, HeartbeatOutcome};
pub use recovery::{
    NoopHandler, RecoveryConfig, RecoveryHandler, RecoveryHandlerError, RecoveryOutcome, RecoveryRequest,
};
pub use scheduler::{PendingAttempt, RecoveryScheduler, ScheduleCommand, SchedulerHandle};

/// The Warden supervises recovery for every agent the coordinator tracks
pub struct Warden {
    coordinator: Arc<RecoveryCoordinator>,
    commands: mpsc::UnboundedReceiver<ScheduleCommand>,
    failures: Option<broadcast::Receiver<FailureEvent>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Warden {
    /// Create a Warden over `coordinator`. `commands` is the receiving side of
    /// the `SchedulerHandle` the coordinator was built with.
    pub fn new(
        coordinator: Arc<RecoveryCoordinator>,
        commands: mpsc::UnboundedReceiver<ScheduleCommand>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            coordinator,
            commands,
            failures: None,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Feed monitor failures into the coordinator
    pub fn with_failure_feed(mut self, failures: broadcast::Receiver<FailureEvent>) -> Self {
        self.failures = Some(failures);
        self
    }

    pub fn handle(&self) -> WardenHandle {
        WardenHandle {
            shutdown: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Run the Warden event loop until shutdown is requested
    ///
    /// This should be spawned as a tokio task
    pub async fn run(self) {
        let Warden {
            coordinator,
            commands,
            mut failures,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;
        let config = coordinator.config().clone();

        let (scheduler, mut due) = RecoveryScheduler::new(commands);
        let scheduler_task = tokio::spawn(scheduler.run());

        let mut sweep = tokio::time::interval(config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        tracing::info!(
            sweep_ms = config.sweep_interval_ms,
            max_attempts = config.max_attempts,
            "warden started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                Some(pending) = due.recv() => {
                    launch(&coordinator, &mut in_flight, pending);
                }
                _ = sweep.tick() => {
                    let failed = coordinator.check_heartbeats(now_millis());
                    if !failed.is_empty() {
                        tracing::debug!(count = failed.len(), "heartbeat sweep failed agents");
                    }
                }
                received = next_failure(&mut failures) => match received {
                    Ok(event) => coordinator.on_failure(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::error!(skipped, "warden lagged behind failure feed, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("failure feed closed");
                        failures = None;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "recovery task failed");
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "warden shutting down");
        coordinator.stop_accepting();

        let drained = tokio::time::timeout(config.shutdown_grace(), async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                abandoned = in_flight.len(),
                "grace period elapsed, abandoning recovery attempts"
            );
            in_flight.abort_all();
        }

        if let Err(e) = scheduler_task.await {
            tracing::error!(error = %e, "recovery scheduler task failed");
        }
        tracing::info!("warden stopped");
    }

    /// Spawn the event loop onto the current runtime
    pub fn spawn(self) -> (WardenHandle, tokio::task::JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }
}

/// Start a due attempt: validate it, run the handler off the async threads,
/// then hand the result back to the coordinator
fn launch(coordinator: &Arc<RecoveryCoordinator>, in_flight: &mut JoinSet<()>, pending: PendingAttempt) {
    let Some(request) = coordinator.begin_attempt(&pending) else {
        return;
    };
    let handler = coordinator.handler();
    let coordinator = Arc::clone(coordinator);

    in_flight.spawn(async move {
        let agent_id = request.agent_id;
        let result = match tokio::task::spawn_blocking(move || handler.attempt(&request)).await {
            Ok(Ok(outcome)) => AttemptResult::from(outcome),
            Ok(Err(e)) => AttemptResult::Errored(e.to_string()),
            Err(e) => AttemptResult::Errored(format!("recovery handler panicked: {}", e)),
        };
        coordinator.complete_attempt(agent_id, pending.episode, result);
    });
}

async fn next_failure(
    feed: &mut Option<broadcast::Receiver<FailureEvent>>,
) -> std::result::Result<FailureEvent, broadcast::error::RecvError> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle for stopping the Warden from anywhere, sync or async
#[derive(Clone)]
pub struct WardenHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl WardenHandle {
    /// Request shutdown. Returns an error if it was already requested.
    pub fn shutdown(&self) -> Result<()> {
        if self.shutdown.send_replace(true) {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sickbay::{Failure, NullSink};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn warden_with(
        config: RecoveryConfig,
        handler: Arc<dyn RecoveryHandler>,
    ) -> (Arc<RecoveryCoordinator>, Warden) {
        let (scheduler, commands) = SchedulerHandle::channel();
        let coordinator = Arc::new(
            RecoveryCoordinator::new(config, handler, scheduler).with_sink(Arc::new(NullSink)),
        );
        let warden = Warden::new(Arc::clone(&coordinator), commands);
        (coordinator, warden)
    }

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig::default()
            .with_backoff_base_ms(10)
            .with_sweep_interval_ms(5)
            .with_shutdown_grace_ms(200)
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

    #[tokio::test]
    async fn test_failed_agent_is_recovered() {
        let handler = |_: &RecoveryRequest| -> std::result::Result<RecoveryOutcome, RecoveryHandlerError> {
            Ok(RecoveryOutcome::Recovered)
        };
        let (coordinator, warden) = warden_with(fast_config(), Arc::new(handler));
        let (handle, task) = warden.spawn();

        coordinator.register(1);
        coordinator.mark_agent_failed(1, "test");
        wait_for(|| coordinator.agent_status(1) == HealthState::Recovering).await;

        handle.shutdown().unwrap();
        task.await.unwrap();
        assert_eq!(coordinator.metrics().recovered, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_through_the_loop() {
        let (coordinator, warden) = warden_with(fast_config(), Arc::new(NoopHandler));
        let (handle, task) = warden.spawn();

        coordinator.register(1);
        coordinator.mark_agent_failed(1, "test");
        wait_for(|| coordinator.metrics().exhausted == 1).await;

        let metrics = coordinator.metrics();
        assert_eq!(metrics.attempts_started, 3);
        assert_eq!(metrics.not_recovered, 3);

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_handler_counts_as_error() {
        let handler = |_: &RecoveryRequest| -> std::result::Result<RecoveryOutcome, RecoveryHandlerError> {
            panic!("handler blew up")
        };
        let (coordinator, warden) = warden_with(fast_config(), Arc::new(handler));
        let (handle, task) = warden.spawn();

        coordinator.register(1);
        coordinator.mark_agent_failed(1, "test");
        wait_for(|| coordinator.metrics().exhausted == 1).await;
        assert_eq!(coordinator.metrics().errored, 3);

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_sweep_runs() {
        let config = fast_config().with_heartbeat_timeout_ms(20);
        let (coordinator, warden) = warden_with(config, Arc::new(NoopHandler));
        let (handle, task) = warden.spawn();

        coordinator.register(1);
        wait_for(|| coordinator.agent_status(1) == HealthState::Failed).await;
        assert!(coordinator.failures_for(1).iter().any(|e| e.details().starts_with("no heartbeat")));

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_feed_is_forwarded() {
        let (feed_tx, feed_rx) = broadcast::channel(16);
        let (coordinator, warden) = warden_with(fast_config(), Arc::new(NoopHandler));
        let (handle, task) = warden.with_failure_feed(feed_rx).spawn();

        coordinator.register(2);
        feed_tx
            .send(FailureEvent::new(now_millis(), 2, Failure::Collision { with: Some(1) }))
            .unwrap();
        wait_for(|| coordinator.agent_status(2) == HealthState::Failed).await;

        // A closed feed does not stop the loop
        drop(feed_tx);
        coordinator.register(3);
        coordinator.mark_agent_failed(3, "manual");
        wait_for(|| coordinator.metrics().exhausted == 2).await;

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_lagged_feed_keeps_processing() {
        let (feed_tx, feed_rx) = broadcast::channel(2);
        let (coordinator, warden) = warden_with(fast_config(), Arc::new(NoopHandler));
        for agent in 1..=4 {
            coordinator.register(agent);
            feed_tx
                .send(FailureEvent::new(now_millis(), agent, Failure::Collision { with: None }))
                .unwrap();
        }

        // The two oldest events were overwritten before the loop started
        let (handle, task) = warden.with_failure_feed(feed_rx).spawn();
        wait_for(|| {
            coordinator.agent_status(3) == HealthState::Failed && coordinator.agent_status(4) == HealthState::Failed
        })
        .await;
        assert_eq!(coordinator.agent_status(1), HealthState::Active);
        assert_eq!(coordinator.agent_status(2), HealthState::Active);

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_slow_attempts() {
        let started = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&started);
        let handler = move |_: &RecoveryRequest| -> std::result::Result<RecoveryOutcome, RecoveryHandlerError> {
            *counter.lock() += 1;
            std::thread::sleep(Duration::from_millis(500));
            Ok(RecoveryOutcome::Recovered)
        };
        let config = fast_config().with_shutdown_grace_ms(20);
        let (coordinator, warden) = warden_with(config, Arc::new(handler));
        let (handle, task) = warden.spawn();

        coordinator.register(1);
        coordinator.mark_agent_failed(1, "test");
        wait_for(|| *started.lock() == 1).await;

        handle.shutdown().unwrap();
        assert!(matches!(handle.shutdown(), Err(Error::ShuttingDown)));
        task.await.unwrap();

        assert!(!coordinator.is_accepting());
        // The abandoned attempt never reports back
        assert_eq!(coordinator.agent_status(1), HealthState::Failed);
        assert_eq!(coordinator.metrics().recovered, 0);
    }
}
