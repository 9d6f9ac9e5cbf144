//! Delayed recovery attempts
//!
//! The coordinator pushes `(attempt, delay)` pairs through a `SchedulerHandle`;
//! the scheduler task keeps them in a deadline-ordered heap and hands each one
//! back on the due channel once its delay has elapsed.

use crate::agent::AgentId;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A recovery attempt waiting to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAttempt {
    pub agent_id: AgentId,
    /// Failure episode the attempt belongs to
    pub episode: u64,
    /// 1-based attempt number within the episode
    pub attempt: u32,
}

/// Commands accepted by the scheduler task
#[derive(Debug)]
pub enum ScheduleCommand {
    Schedule {
        attempt: PendingAttempt,
        delay: Duration,
    },
    /// Drop everything still queued and stop
    Shutdown,
}

/// Sending side of the scheduler; usable from sync code
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::UnboundedSender<ScheduleCommand>,
}

impl SchedulerHandle {
    /// Create a handle and the command stream a `RecoveryScheduler` consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScheduleCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn schedule(&self, attempt: PendingAttempt, delay: Duration) -> Result<()> {
        self.sender
            .send(ScheduleCommand::Schedule { attempt, delay })
            .map_err(|_| Error::ShuttingDown)
    }

    pub fn shutdown(&self) {
        // Already gone is fine
        let _ = self.sender.send(ScheduleCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Heap entry, earliest deadline first, FIFO among equal deadlines
struct Queued {
    due: Instant,
    seq: u64,
    attempt: PendingAttempt,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline is on top
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deadline-ordered queue of pending attempts
pub struct RecoveryScheduler {
    commands: mpsc::UnboundedReceiver<ScheduleCommand>,
    due: mpsc::UnboundedSender<PendingAttempt>,
    queue: BinaryHeap<Queued>,
    seq: u64,
}

impl RecoveryScheduler {
    /// Build a scheduler over `commands`; due attempts come out of the
    /// returned receiver
    pub fn new(
        commands: mpsc::UnboundedReceiver<ScheduleCommand>,
    ) -> (Self, mpsc::UnboundedReceiver<PendingAttempt>) {
        let (due, due_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            commands,
            due,
            queue: BinaryHeap::new(),
            seq: 0,
        };
        (scheduler, due_rx)
    }

    /// Run until shut down or until every handle and the due receiver are gone
    pub async fn run(mut self) {
        loop {
            let next_due = self.queue.peek().map(|q| q.due);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ScheduleCommand::Schedule { attempt, delay }) => {
                        self.push(attempt, delay);
                    }
                    Some(ScheduleCommand::Shutdown) | None => break,
                },
                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    if !self.release_due() {
                        break;
                    }
                }
            }
        }

        if !self.queue.is_empty() {
            tracing::debug!(dropped = self.queue.len(), "scheduler stopped with attempts queued");
        }
    }

    fn push(&mut self, attempt: PendingAttempt, delay: Duration) {
        self.seq += 1;
        tracing::trace!(
            agent = attempt.agent_id,
            attempt = attempt.attempt,
            delay_ms = delay.as_millis() as u64,
            "recovery attempt queued"
        );
        self.queue.push(Queued {
            due: Instant::now() + delay,
            seq: self.seq,
            attempt,
        });
    }

    /// Emit every attempt whose deadline has passed. False once nobody listens.
    fn release_due(&mut self) -> bool {
        let now = Instant::now();
        while self.queue.peek().is_some_and(|q| q.due <= now) {
            let Some(queued) = self.queue.pop() else {
                break;
            };
            if self.due.send(queued.attempt).is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(agent_id: AgentId) -> PendingAttempt {
        PendingAttempt {
            agent_id,
            episode: 0,
            attempt: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_in_deadline_order() {
        let (handle, commands) = SchedulerHandle::channel();
        let (scheduler, mut due) = RecoveryScheduler::new(commands);
        tokio::spawn(scheduler.run());

        let start = Instant::now();
        handle.schedule(pending(1), Duration::from_secs(4)).unwrap();
        handle.schedule(pending(2), Duration::from_secs(2)).unwrap();
        handle.schedule(pending(3), Duration::from_secs(2)).unwrap();

        assert_eq!(due.recv().await.unwrap().agent_id, 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(due.recv().await.unwrap().agent_id, 3);
        assert_eq!(due.recv().await.unwrap().agent_id, 1);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_queued_attempts() {
        let (handle, commands) = SchedulerHandle::channel();
        let (scheduler, mut due) = RecoveryScheduler::new(commands);
        let task = tokio::spawn(scheduler.run());

        handle.schedule(pending(1), Duration::from_secs(10)).unwrap();
        handle.shutdown();
        task.await.unwrap();

        assert!(due.recv().await.is_none());
        assert!(handle.is_closed());
        assert!(matches!(
            handle.schedule(pending(2), Duration::ZERO),
            Err(Error::ShuttingDown)
        ));
    }

    #[test]
    fn test_heap_order() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        for (seq, secs) in [(1, 5), (2, 1), (3, 1), (4, 3)] {
            heap.push(Queued {
                due: now + Duration::from_secs(secs),
                seq,
                attempt: pending(seq as AgentId),
            });
        }
        let order: Vec<AgentId> = std::iter::from_fn(|| heap.pop().map(|q| q.attempt.agent_id)).collect();
        assert_eq!(order, vec![2, 3, 4, 1]);
    }
}
