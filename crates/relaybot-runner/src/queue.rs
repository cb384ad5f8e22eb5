//! Strictly serial FIFO job queue.
//!
//! Producers enqueue concurrently; a single drain task runs jobs one at a time
//! through a [`JobExecutor`]. The drain task is spawned when the first job
//! arrives at an idle queue and exits once the queue is empty again.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info};

use relaybot_types::{Destination, ExecutionError, ExecutionResult};

use crate::runner::JobExecutor;

/// Public view of a queued or running job.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub id: String,
    pub prompt: String,
    pub destination: Destination,
    pub enqueued_at: DateTime<Utc>,
}

struct Job {
    summary: JobSummary,
    working_dir: Option<PathBuf>,
    done: oneshot::Sender<ExecutionResult>,
}

impl Job {
    fn resolve(self, result: ExecutionResult) {
        if self.done.send(result).is_err() {
            debug!(job_id = %self.summary.id, "Job result dropped, nobody waiting");
        }
    }
}

struct QueueState {
    /// Whether a drain task is alive.
    busy: bool,
    pending: VecDeque<Job>,
    current: Option<JobSummary>,
}

struct Shared {
    state: Mutex<QueueState>,
    executor: Arc<dyn JobExecutor>,
}

/// Cheap clonable handle to the job queue.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

/// Returned by [`JobQueue::enqueue`].
pub struct JobHandle {
    pub id: String,
    /// Place in line when enqueued, 1-based, with the running job counted.
    ///
    /// A job enqueued on an idle queue is 1; one enqueued behind a running
    /// job is 2, not 1. Anything above 1 therefore means the job has to wait.
    /// This is a snapshot and is not updated as the queue drains.
    pub position: usize,
    rx: oneshot::Receiver<ExecutionResult>,
}

impl JobHandle {
    /// Wait for the job's result.
    pub async fn wait(self) -> ExecutionResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => ExecutionResult::failure("", ExecutionError::Worker("job dropped".into())),
        }
    }
}

impl JobQueue {
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    busy: false,
                    pending: VecDeque::new(),
                    current: None,
                }),
                executor,
            }),
        }
    }

    /// Append a job to the tail of the queue.
    pub async fn enqueue(
        &self,
        prompt: impl Into<String>,
        destination: Destination,
        working_dir: Option<PathBuf>,
    ) -> JobHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let job = Job {
            summary: JobSummary {
                id: id.clone(),
                prompt: prompt.into(),
                destination,
                enqueued_at: Utc::now(),
            },
            working_dir,
            done: tx,
        };

        let mut state = self.shared.state.lock().await;
        state.pending.push_back(job);
        let position = state.pending.len() + usize::from(state.current.is_some());
        if !state.busy {
            state.busy = true;
            tokio::spawn(drain(self.shared.clone()));
        }
        drop(state);

        info!(job_id = %id, position, "Job enqueued");
        JobHandle { id, position, rx }
    }

    /// Remove a job that has not started yet; it resolves as cancelled.
    pub async fn remove(&self, id: &str) -> bool {
        let mut state = self.shared.state.lock().await;
        let Some(index) = state.pending.iter().position(|j| j.summary.id == id) else {
            return false;
        };
        let Some(job) = state.pending.remove(index) else {
            return false;
        };
        drop(state);

        info!(job_id = %id, "Job removed from queue");
        job.resolve(ExecutionResult::failure("", ExecutionError::Dequeued));
        true
    }

    /// Number of jobs waiting (not counting the running one).
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending(&self) -> Vec<JobSummary> {
        let state = self.shared.state.lock().await;
        state.pending.iter().map(|j| j.summary.clone()).collect()
    }

    /// The job currently executing, if any.
    pub async fn current(&self) -> Option<JobSummary> {
        self.shared.state.lock().await.current.clone()
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock().await;
            state.current = None;
            match state.pending.pop_front() {
                Some(job) => {
                    state.current = Some(job.summary.clone());
                    job
                }
                None => {
                    state.busy = false;
                    debug!("Job queue idle");
                    return;
                }
            }
        };
        run_job(&shared, job).await;
    }
}

async fn run_job(shared: &Shared, job: Job) {
    let executor = shared.executor.clone();
    let id = job.summary.id.clone();
    let prompt = job.summary.prompt.clone();
    let working_dir = job.working_dir.clone();
    let started = Instant::now();
    info!(job_id = %id, destination = %job.summary.destination, "Job started");

    // Run in its own task so a panic in the executor cannot take the drain loop down.
    let task = {
        let id = id.clone();
        tokio::spawn(async move { executor.run(&prompt, &id, working_dir.as_deref()).await })
    };
    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(job_id = %id, "Job execution task failed: {e}");
            ExecutionResult::failure("", ExecutionError::Worker(e.to_string()))
        }
    };

    info!(
        job_id = %id,
        status = %result.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Job finished"
    );
    job.resolve(result);
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;

    /// Records execution order and the peak number of concurrent runs.
    #[derive(Default)]
    struct RecordingExecutor {
        active: AtomicUsize,
        peak: AtomicUsize,
        order: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobExecutor for RecordingExecutor {
        async fn run(&self, prompt: &str, _job_id: &str, _wd: Option<&Path>) -> ExecutionResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.order.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if prompt == "panic" {
                panic!("executor blew up");
            }
            ExecutionResult::success(format!("done: {prompt}"))
        }
    }

    /// Blocks every run until a permit is added.
    struct GatedExecutor {
        gate: Semaphore,
    }

    #[async_trait]
    impl JobExecutor for GatedExecutor {
        async fn run(&self, prompt: &str, _job_id: &str, _wd: Option<&Path>) -> ExecutionResult {
            self.gate.acquire().await.unwrap().forget();
            ExecutionResult::success(prompt)
        }
    }

    fn dest() -> Destination {
        Destination::new("console", "local")
    }

    async fn wait_until_running(queue: &JobQueue) {
        while queue.current().await.is_none() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn test_fifo_and_single_worker() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = JobQueue::new(executor.clone());

        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(queue.enqueue(format!("job-{i}"), dest(), None).await);
        }
        let positions: Vec<_> = handles.iter().map(|h| h.position).collect();
        assert_eq!(positions, (1..=8).collect::<Vec<_>>());

        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.wait().await;
            assert_eq!(result.output, format!("done: job-{i}"));
        }

        let order = executor.order.lock().unwrap().clone();
        let expected: Vec<_> = (0..8).map(|i| format!("job-{i}")).collect();
        assert_eq!(order, expected);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_producers_each_get_a_result() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = JobQueue::new(executor.clone());

        let mut tasks = Vec::new();
        for i in 0..10 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                queue.enqueue(format!("p{i}"), dest(), None).await.wait().await
            }));
        }
        let mut outputs = Vec::new();
        for task in tasks {
            let result = task.await.unwrap();
            assert!(result.is_success());
            outputs.push(result.output);
        }
        outputs.sort();
        outputs.dedup();
        assert_eq!(outputs.len(), 10);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_position_counts_running_job() {
        let executor = Arc::new(GatedExecutor {
            gate: Semaphore::new(0),
        });
        let queue = JobQueue::new(executor.clone());

        let first = queue.enqueue("first", dest(), None).await;
        assert_eq!(first.position, 1);
        wait_until_running(&queue).await;

        // Nothing pending, but the running job still occupies position 1.
        let second = queue.enqueue("second", dest(), None).await;
        assert_eq!(second.position, 2);
        assert_eq!(queue.len().await, 1);

        executor.gate.add_permits(2);
        assert_eq!(first.wait().await.output, "first");
        assert_eq!(second.wait().await.output, "second");
    }

    #[tokio::test]
    async fn test_remove_waiting_job() {
        let executor = Arc::new(GatedExecutor {
            gate: Semaphore::new(0),
        });
        let queue = JobQueue::new(executor.clone());

        let a = queue.enqueue("a", dest(), None).await;
        wait_until_running(&queue).await;
        let b = queue.enqueue("b", dest(), None).await;
        let c = queue.enqueue("c", dest(), None).await;
        assert_eq!(b.position, 2);
        assert_eq!(c.position, 3);
        assert_eq!(queue.len().await, 2);

        // Running job cannot be removed from the queue.
        assert!(!queue.remove(&a.id).await);
        assert!(queue.remove(&b.id).await);
        assert!(!queue.remove(&b.id).await);
        assert!(!queue.remove("unknown").await);

        let removed = b.wait().await;
        assert_eq!(removed.error, Some(ExecutionError::Dequeued));
        assert_eq!(removed.output, "");

        let pending: Vec<_> = queue.pending().await.into_iter().map(|j| j.id).collect();
        assert_eq!(pending, vec![c.id.clone()]);

        executor.gate.add_permits(2);
        assert_eq!(a.wait().await.output, "a");
        assert_eq!(c.wait().await.output, "c");
    }

    #[tokio::test]
    async fn test_worker_survives_panic() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = JobQueue::new(executor);

        let bad = queue.enqueue("panic", dest(), None).await;
        let good = queue.enqueue("after", dest(), None).await;

        let result = bad.wait().await;
        assert!(matches!(result.error, Some(ExecutionError::Worker(_))));
        assert_eq!(good.wait().await.output, "done: after");
    }

    #[tokio::test]
    async fn test_queue_restarts_after_idle() {
        let executor = Arc::new(RecordingExecutor::default());
        let queue = JobQueue::new(executor);

        assert_eq!(queue.enqueue("one", dest(), None).await.wait().await.output, "done: one");
        // Let the drain task observe the empty queue and exit.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.current().await.is_none());

        let handle = queue.enqueue("two", dest(), None).await;
        assert_eq!(handle.position, 1);
        assert_eq!(handle.wait().await.output, "done: two");
    }
}
