//! Fixed-size background worker pool. Every side effect the Ingest
//! Coordinator and Scheduler trigger that touches the vector store runs
//! here instead of inline, so request handlers stay fast and indexing
//! failures don't take the HTTP response down with them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use newsdesk_core::errors::{CoreError, CoreResult};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::scheduler::SchedulerJob;

#[derive(Debug, Clone)]
pub enum Task {
    IndexDocument { user_id: String, document_id: String },
    EvictDocumentVectors { user_id: String, document_id: String },
    CompactUserIndex { user_id: String },
    RunSchedulerJob { job: SchedulerJob },
}

impl Task {
    /// Tasks are ordered per the user they act on, so that two users' RSS
    /// polls or index mutations run in parallel bounded only by pool size.
    /// Only genuinely global jobs (the daily web sweep and weekly
    /// maintenance, which touch every user's sources/indices in one pass)
    /// share a single lane so they never reorder relative to each other.
    fn lane(&self) -> &str {
        match self {
            Task::IndexDocument { user_id, .. }
            | Task::EvictDocumentVectors { user_id, .. }
            | Task::CompactUserIndex { user_id } => user_id,
            Task::RunSchedulerJob { job: SchedulerJob::PollRssSource { user_id, .. } } => user_id,
            Task::RunSchedulerJob { job: SchedulerJob::WebSweep | SchedulerJob::WeeklyMaintenance } => "__scheduler__",
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> CoreResult<()>;
}

struct UserLanes {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLanes {
    fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    async fn lane(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Large enough that the executor never throttles on in-flight count itself
/// (the bounded queue is what applies backpressure); just a ceiling the
/// shutdown drain can fully reacquire.
const MAX_INFLIGHT: u32 = 1_000_000;

pub struct Executor {
    sender: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
    inflight: Arc<tokio::sync::Semaphore>,
    drain_deadline: Duration,
}

impl Executor {
    pub fn spawn(config: &ExecutorConfig, handler: Arc<dyn TaskHandler>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let lanes = Arc::new(UserLanes::new());
        let inflight = Arc::new(tokio::sync::Semaphore::new(MAX_INFLIGHT as usize));

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let receiver = receiver.clone();
            let lanes = lanes.clone();
            let handler = handler.clone();
            let inflight = inflight.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else {
                        info!(worker_id, "executor worker shutting down, channel closed");
                        return;
                    };

                    let permit = inflight.clone().acquire_owned().await.expect("semaphore not closed");
                    let lane = lanes.lane(task.lane()).await;
                    let _lane_guard = lane.lock().await;

                    if let Err(e) = handler.handle(task.clone()).await {
                        error!(worker_id, error = %e, task = ?task, "background task failed");
                    }
                    drop(permit);
                }
            }));
        }

        Self { sender, workers, inflight, drain_deadline: Duration::from_secs(config.drain_deadline_s) }
    }

    /// Non-blocking enqueue; a full queue surfaces as
    /// [`CoreError::Backpressure`] rather than blocking the caller.
    pub fn submit(&self, task: Task) -> CoreResult<()> {
        self.sender
            .try_send(task)
            .map_err(|e| CoreError::backpressure(format!("executor queue is full: {e}")))
    }

    /// Stops accepting new tasks and waits up to `drain_deadline_s` for
    /// in-flight work to finish, logging anything still running past that.
    pub async fn shutdown(self) {
        drop(self.sender);
        let wait = self.inflight.acquire_many(MAX_INFLIGHT);
        match tokio::time::timeout(self.drain_deadline, wait).await {
            Ok(_) => info!("executor drained cleanly"),
            Err(_) => warn!(deadline_s = self.drain_deadline.as_secs(), "executor drain deadline exceeded, tasks still in flight"),
        }
        for worker in self.workers {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, _task: Task) -> CoreResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn submitted_tasks_all_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let config = ExecutorConfig { workers: 2, queue_capacity: 16, drain_deadline_s: 5 };
        let executor = Executor::spawn(&config, Arc::new(CountingHandler { count: count.clone() }));

        for i in 0..8 {
            executor.submit(Task::IndexDocument { user_id: "u1".to_string(), document_id: format!("d{i}") }).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn full_queue_is_backpressure() {
        let config = ExecutorConfig { workers: 0, queue_capacity: 1, drain_deadline_s: 1 };
        let count = Arc::new(AtomicUsize::new(0));
        let executor = Executor::spawn(&config, Arc::new(CountingHandler { count }));
        executor.submit(Task::CompactUserIndex { user_id: "u1".to_string() }).unwrap();
        let err = executor.submit(Task::CompactUserIndex { user_id: "u1".to_string() }).unwrap_err();
        assert_eq!(err.code(), "backpressure");
        executor.shutdown().await;
    }
}
