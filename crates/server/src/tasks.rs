//! Bounded pool for fire-and-forget background work
//!
//! Transcript writes, moderation, scoring and email all run here so the
//! request path and socket read loops never wait on them. Failures are
//! logged and counted, never surfaced to the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Panicked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub spawned: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct TaskStats {
    spawned: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

pub struct TaskPool {
    permits: Arc<Semaphore>,
    stats: Arc<TaskStats>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskPool({} in flight)", *self.in_flight.borrow())
    }
}

impl TaskPool {
    /// At most `concurrency` tasks run at once; extra tasks queue for a permit.
    pub fn new(concurrency: usize) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            stats: Arc::new(TaskStats::default()),
            in_flight: Arc::new(in_flight),
        }
    }

    pub fn spawn<F>(&self, name: &'static str, task: F) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.stats.spawned.fetch_add(1, Ordering::Relaxed);
        self.in_flight.send_modify(|n| *n += 1);

        let permits = self.permits.clone();
        let stats = self.stats.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only fails on shutdown.
            let _permit = permits.acquire_owned().await.ok();

            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!("[Tasks] {} finished", name);
                    TaskOutcome::Succeeded
                }
                Ok(Err(e)) => {
                    warn!("[Tasks] {} failed: {:#}", name, e);
                    TaskOutcome::Failed
                }
                Err(_) => {
                    error!("[Tasks] {} panicked", name);
                    TaskOutcome::Panicked
                }
            };

            match outcome {
                TaskOutcome::Succeeded => stats.succeeded.fetch_add(1, Ordering::Relaxed),
                TaskOutcome::Failed | TaskOutcome::Panicked => {
                    stats.failed.fetch_add(1, Ordering::Relaxed)
                }
            };
            in_flight.send_modify(|n| *n = n.saturating_sub(1));
            outcome
        })
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            spawned: self.stats.spawned.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            in_flight: *self.in_flight.borrow(),
        }
    }

    /// Resolve once no task is running or queued.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn counts_success_failure_and_panic() {
        let pool = TaskPool::new(2);
        pool.spawn("ok", async { Ok(()) });
        pool.spawn("err", async { anyhow::bail!("boom") });
        let panicked = pool.spawn("panic", async {
            if true {
                panic!("task panic");
            }
            Ok(())
        });

        assert_eq!(panicked.await.unwrap(), TaskOutcome::Panicked);
        pool.wait_idle().await;

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.spawned, 3);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = TaskPool::new(1);
        let running = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));

        for _ in 0..4 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn("bounded", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        pool.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.snapshot().succeeded, 4);
    }
}
