//! Fixed-size worker pool for outbound batches
//!
//! A run is built in two steps. [`WorkerPool::submit`] freezes the job list
//! into a closed queue, then [`QueuedRun::run`] starts the workers and hands
//! back a [`ResultStream`]. Each worker loops:
//!
//! ```text
//! Idle ──job──► Executing ──done──► Idle
//!   │
//!   └──cancel──► Cancelled (emits one notice, stops)
//! ```
//!
//! Cancellation is only observed between jobs; a delivery in flight always
//! runs to completion and reports its outcome.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tally_core::{Metric, Result, TallyError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sends one batch to its destination
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, batch: &[Metric]) -> Result<()>;
}

/// A unit of work: one batch and where it goes
pub struct Job {
    pub id: u64,
    pub batch: Vec<Metric>,
    pub delivery: Arc<dyn Delivery>,
}

impl Job {
    pub fn new(id: u64, batch: Vec<Metric>, delivery: Arc<dyn Delivery>) -> Self {
        Self { id, batch, delivery }
    }
}

/// Outcome reported by a worker
#[derive(Debug)]
pub struct JobResult {
    /// `None` for a cancellation notice
    pub job_id: Option<u64>,
    pub worker: usize,
    pub outcome: Result<()>,
}

impl JobResult {
    pub fn is_cancellation(&self) -> bool {
        self.job_id.is_none() && matches!(self.outcome, Err(TallyError::Cancelled))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// A pool of `workers` tasks; zero is raised to one
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a fixed list of jobs. The queue is closed on return.
    pub fn submit(&self, jobs: Vec<Job>) -> QueuedRun {
        let len = jobs.len();
        let (tx, rx) = mpsc::channel(len.max(1));
        for job in jobs {
            if let Err(e) = tx.try_send(job) {
                warn!("Job {} was not queued", e.into_inner().id);
            }
        }

        QueuedRun {
            workers: self.workers,
            queue: rx,
            len,
        }
    }
}

/// A closed job queue waiting for workers
pub struct QueuedRun {
    workers: usize,
    queue: mpsc::Receiver<Job>,
    len: usize,
}

impl QueuedRun {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start the workers
    pub fn run(self, cancel: CancellationToken) -> ResultStream {
        let queue = Arc::new(Mutex::new(self.queue));
        // Room for every job result plus one cancellation notice per worker
        let (tx, rx) = mpsc::channel(self.len + self.workers);

        let mut tasks = JoinSet::new();
        for worker in 0..self.workers {
            tasks.spawn(worker_loop(worker, queue.clone(), tx.clone(), cancel.clone()));
        }

        ResultStream { results: rx, tasks }
    }
}

enum Next {
    Job(Job),
    Cancelled,
    Drained,
}

async fn worker_loop(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobResult>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Next::Cancelled,
            job = async { queue.lock().await.recv().await } => match job {
                Some(job) => Next::Job(job),
                None => Next::Drained,
            },
        };

        let result = match next {
            Next::Job(job) => {
                debug!("Worker {} delivering job {} ({} samples)", worker, job.id, job.batch.len());
                let outcome = job.delivery.deliver(&job.batch).await;
                JobResult {
                    job_id: Some(job.id),
                    worker,
                    outcome,
                }
            }
            Next::Cancelled => {
                debug!("Worker {} cancelled", worker);
                let _ = results
                    .send(JobResult {
                        job_id: None,
                        worker,
                        outcome: Err(TallyError::Cancelled),
                    })
                    .await;
                return;
            }
            Next::Drained => return,
        };

        if results.send(result).await.is_err() {
            return;
        }
    }
}

/// Results of a run, in completion order
///
/// The stream ends once every worker has stopped.
pub struct ResultStream {
    results: mpsc::Receiver<JobResult>,
    tasks: JoinSet<()>,
}

impl ResultStream {
    /// Drain every result and wait for all workers to exit
    pub async fn collect_all(mut self) -> Vec<JobResult> {
        let mut collected = Vec::new();
        while let Some(result) = self.results.recv().await {
            collected.push(result);
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
            }
        }
        collected
    }
}

impl Stream for ResultStream {
    type Item = JobResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<JobResult>> {
        self.results.poll_recv(cx)
    }
}
