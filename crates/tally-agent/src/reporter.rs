//! Poll and report loops
//!
//! The poll loop feeds the [`RuntimeCollector`] every `poll_interval`. The
//! report loop drains it every `report_interval`, splits the batch into
//! `rate_limit` jobs and runs them through a fresh [`WorkerPool`] run.
//! Deltas from jobs that failed or never ran are handed back to the
//! collector for the next report.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_core::{AgentConfig, Metric};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::RuntimeCollector;
use crate::pool::{Delivery, Job, WorkerPool};

/// Tally of one report
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub delivered: usize,
    pub failed: usize,
    /// Jobs that were never claimed because the run was cancelled
    pub skipped: usize,
}

pub struct Reporter {
    collector: Arc<RuntimeCollector>,
    delivery: Arc<dyn Delivery>,
    pool: WorkerPool,
    poll_interval: Duration,
    report_interval: Duration,
    next_job_id: AtomicU64,
}

impl Reporter {
    pub fn new(
        config: &AgentConfig,
        collector: Arc<RuntimeCollector>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        Self {
            collector,
            delivery,
            pool: WorkerPool::new(config.rate_limit),
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            next_job_id: AtomicU64::new(0),
        }
    }

    pub fn collector(&self) -> &Arc<RuntimeCollector> {
        &self.collector
    }

    /// Split `batch` into at most one chunk per worker
    fn split(&self, batch: Vec<Metric>) -> Vec<Vec<Metric>> {
        let chunk_len = batch.len().div_ceil(self.pool.workers()).max(1);
        batch.chunks(chunk_len).map(<[Metric]>::to_vec).collect()
    }

    /// Drain the collector and deliver what it held
    pub async fn report_once(&self, cancel: &CancellationToken) -> ReportSummary {
        let batch = self.collector.drain_batch().await;
        if batch.is_empty() {
            debug!("Nothing to report");
            return ReportSummary::default();
        }

        let mut outstanding: HashMap<u64, Vec<Metric>> = HashMap::new();
        let jobs: Vec<Job> = self
            .split(batch)
            .into_iter()
            .map(|chunk| {
                let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
                outstanding.insert(id, chunk.clone());
                Job::new(id, chunk, self.delivery.clone())
            })
            .collect();

        let results = self.pool.submit(jobs).run(cancel.clone()).collect_all().await;

        let mut summary = ReportSummary::default();
        for result in results {
            let Some(job_id) = result.job_id else {
                continue;
            };
            match result.outcome {
                Ok(()) => {
                    outstanding.remove(&job_id);
                    summary.delivered += 1;
                }
                Err(e) => {
                    warn!("Job {} on worker {} failed: {}", job_id, result.worker, e);
                    summary.failed += 1;
                }
            }
        }
        summary.skipped = outstanding.len().saturating_sub(summary.failed);

        for chunk in outstanding.values() {
            self.collector.requeue(chunk).await;
        }

        info!(
            "Report: {} delivered, {} failed, {} skipped",
            summary.delivered, summary.failed, summary.skipped
        );
        summary
    }

    /// Run both loops until `shutdown`, then attempt one final report
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Agent reporting every {:?}, polling every {:?}, {} workers",
            self.report_interval,
            self.poll_interval,
            self.pool.workers()
        );

        let poller = {
            let collector = self.collector.clone();
            let shutdown = shutdown.clone();
            let period = self.poll_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => collector.poll().await,
                    }
                }
            })
        };

        let mut ticker = interval_at(Instant::now() + self.report_interval, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.report_once(&shutdown).await;
                }
            }
        }

        if let Err(e) = poller.await {
            warn!("Poll loop failed: {}", e);
        }

        info!("Shutting down, sending final report");
        self.report_once(&CancellationToken::new()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tally_core::{Result, TallyError};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        batches: Mutex<Vec<Vec<Metric>>>,
        fail: bool,
    }

    #[async_trait]
    impl Delivery for Capture {
        async fn deliver(&self, batch: &[Metric]) -> Result<()> {
            if self.fail {
                return Err(TallyError::Delivery("unreachable".to_string()));
            }
            self.batches.lock().await.push(batch.to_vec());
            Ok(())
        }
    }

    fn config(rate_limit: usize) -> AgentConfig {
        AgentConfig {
            rate_limit,
            poll_interval_secs: 1,
            report_interval_secs: 2,
            ..AgentConfig::default()
        }
    }

    fn poll_count(batches: &[Vec<Metric>]) -> i64 {
        batches
            .iter()
            .flatten()
            .filter(|m| m.id == crate::collector::POLL_COUNT)
            .filter_map(|m| m.delta)
            .sum()
    }

    #[tokio::test]
    async fn test_report_splits_batch_across_workers() {
        let delivery = Arc::new(Capture::default());
        let collector = Arc::new(RuntimeCollector::new());
        let reporter = Reporter::new(&config(3), collector.clone(), delivery.clone());

        collector.poll().await;
        let summary = reporter.report_once(&CancellationToken::new()).await;

        let batches = delivery.batches.lock().await;
        assert_eq!(summary.delivered, batches.len());
        assert!(batches.len() <= 3 && batches.len() > 1);
        assert_eq!(poll_count(&batches), 1);
    }

    #[tokio::test]
    async fn test_failed_report_requeues_counters() {
        let collector = Arc::new(RuntimeCollector::new());
        let failing = Reporter::new(
            &config(1),
            collector.clone(),
            Arc::new(Capture {
                fail: true,
                ..Capture::default()
            }),
        );

        collector.poll().await;
        let summary = failing.report_once(&CancellationToken::new()).await;
        assert_eq!(summary.failed, 1);

        collector.poll().await;
        let delivery = Arc::new(Capture::default());
        let reporter = Reporter::new(&config(1), collector.clone(), delivery.clone());
        reporter.report_once(&CancellationToken::new()).await;

        assert_eq!(poll_count(&delivery.batches.lock().await), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sends_final_report_on_shutdown() {
        let delivery = Arc::new(Capture::default());
        let collector = Arc::new(RuntimeCollector::new());
        let reporter = Arc::new(Reporter::new(&config(1), collector, delivery.clone()));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reporter.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(4500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let batches = delivery.batches.lock().await;
        // Reports at 2s and 4s, plus the final one
        assert_eq!(batches.len(), 3);
        // Polls at 0s through 4s
        assert_eq!(poll_count(&batches), 5);
    }
}
