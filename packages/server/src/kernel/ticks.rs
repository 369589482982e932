//! Delayed tick scheduling.
//!
//! Scheduler ticks are fired through an at-least-once, best-effort
//! delayed invocation primitive rather than a persistent worker thread:
//! each tick does one unit of work and enqueues its successor. The
//! production implementation is an in-process channel drained by
//! `TickRunner`; restart tolerance comes from the store being the
//! source of truth (a lost tick is recovered by the lazy finalize and
//! the stuck-batch sweep), not from this primitive.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Payload for one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickTask {
    pub batch_id: Uuid,
}

/// Capability trait for enqueueing a delayed scheduler tick.
#[async_trait]
pub trait TickScheduler: Send + Sync {
    async fn enqueue(&self, task: TickTask, delay: Duration) -> Result<()>;
}

/// A tick paired with its due time; opaque to consumers, who only move
/// it between `tick_channel` and `TickRunner::new`.
pub struct ScheduledTick {
    task: TickTask,
    run_at: tokio::time::Instant,
}

/// Handler invoked by the runner for each due tick.
pub type TickHandler =
    Arc<dyn Fn(TickTask) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Channel-backed tick scheduler for production use.
#[derive(Clone)]
pub struct TokioTickScheduler {
    tx: mpsc::UnboundedSender<ScheduledTick>,
}

/// Create the scheduler half and the receiver the runner drains.
pub fn tick_channel() -> (TokioTickScheduler, mpsc::UnboundedReceiver<ScheduledTick>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TokioTickScheduler { tx }, rx)
}

#[async_trait]
impl TickScheduler for TokioTickScheduler {
    async fn enqueue(&self, task: TickTask, delay: Duration) -> Result<()> {
        let scheduled = ScheduledTick {
            task,
            run_at: tokio::time::Instant::now() + delay,
        };

        self.tx
            .send(scheduled)
            .map_err(|_| anyhow::anyhow!("tick runner has shut down"))?;

        Ok(())
    }
}

/// Background service that executes due ticks one at a time.
///
/// Ticks are self-scheduling (each tick enqueues its successor after
/// the inter-job delay), so sequential draining preserves the
/// one-job-at-a-time-per-batch execution model.
pub struct TickRunner {
    rx: mpsc::UnboundedReceiver<ScheduledTick>,
    handler: TickHandler,
    shutdown: Arc<AtomicBool>,
}

impl TickRunner {
    pub fn new(rx: mpsc::UnboundedReceiver<ScheduledTick>, handler: TickHandler) -> Self {
        Self {
            rx,
            handler,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shutdown handle for graceful shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Drain ticks until the channel closes or shutdown is requested.
    pub async fn run(mut self) -> Result<()> {
        info!("tick runner starting");

        while let Some(tick) = self.rx.recv().await {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            tokio::time::sleep_until(tick.run_at).await;

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            debug!(batch_id = %tick.task.batch_id, "executing scheduler tick");

            if let Err(e) = (self.handler)(tick.task).await {
                error!(batch_id = %tick.task.batch_id, error = %e, "scheduler tick failed");
            }
        }

        info!("tick runner stopped");
        Ok(())
    }
}

/// Recording tick scheduler for tests.
///
/// Enqueued tasks are collected instead of executed; tests pop them and
/// drive the scheduler by hand for deterministic ordering.
#[derive(Default)]
pub struct TestTickScheduler {
    queue: Mutex<Vec<TickTask>>,
}

impl TestTickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next enqueued tick, if any.
    pub fn pop(&self) -> Option<TickTask> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl TickScheduler for TestTickScheduler {
    async fn enqueue(&self, task: TickTask, _delay: Duration) -> Result<()> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scheduler_records_in_order() {
        let scheduler = TestTickScheduler::new();
        let first = TickTask {
            batch_id: Uuid::new_v4(),
        };
        let second = TickTask {
            batch_id: Uuid::new_v4(),
        };

        scheduler.enqueue(first, Duration::ZERO).await.unwrap();
        scheduler
            .enqueue(second, Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(scheduler.pending(), 2);
        assert_eq!(scheduler.pop(), Some(first));
        assert_eq!(scheduler.pop(), Some(second));
        assert_eq!(scheduler.pop(), None);
    }

    #[tokio::test]
    async fn runner_executes_due_ticks() {
        let (scheduler, rx) = tick_channel();
        let seen: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(Vec::new()));

        let seen_for_handler = seen.clone();
        let handler: TickHandler = Arc::new(move |task| {
            let seen = seen_for_handler.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(task.batch_id);
                Ok(())
            })
        });

        let runner = TickRunner::new(rx, handler);
        let batch_id = Uuid::new_v4();
        scheduler
            .enqueue(TickTask { batch_id }, Duration::ZERO)
            .await
            .unwrap();
        drop(scheduler); // Close the channel so the runner exits.

        runner.run().await.unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[batch_id]);
    }
}
