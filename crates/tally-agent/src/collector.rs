//! Runtime sampling for the agent
//!
//! Every poll refreshes a set of gauges from the host and bumps `PollCount`.
//! Counters are held as deltas since the last report so a batch carries only
//! what the server has not yet summed.

use rand::Rng;
use std::collections::BTreeMap;
use std::time::Instant;
use sysinfo::System;
use tally_core::{Metric, MetricValue};
use tokio::sync::Mutex;
use tracing::debug;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

#[derive(Debug, Default)]
struct Buffer {
    gauges: BTreeMap<String, f64>,
    /// Counter deltas not yet handed off
    pending: BTreeMap<String, i64>,
}

pub struct RuntimeCollector {
    system: Mutex<System>,
    buffer: Mutex<Buffer>,
    started: Instant,
}

impl RuntimeCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            buffer: Mutex::new(Buffer::default()),
            started: Instant::now(),
        }
    }

    /// Take one round of samples
    pub async fn poll(&self) {
        let mut gauges = self.read_system().await;
        gauges.push((RANDOM_VALUE.to_string(), rand::thread_rng().gen::<f64>()));
        gauges.push((
            "Uptime".to_string(),
            self.started.elapsed().as_secs_f64(),
        ));

        let mut buffer = self.buffer.lock().await;
        for (name, value) in gauges {
            buffer.gauges.insert(name, value);
        }
        let pending = buffer.pending.entry(POLL_COUNT.to_string()).or_insert(0);
        *pending = pending.saturating_add(1);
        let polls = *pending;
        debug!("Polled {} gauges, {} pending polls", buffer.gauges.len(), polls);
    }

    async fn read_system(&self) -> Vec<(String, f64)> {
        let mut system = self.system.lock().await;
        system.refresh_memory();
        system.refresh_cpu_usage();

        let mut gauges = vec![
            ("TotalMemory".to_string(), system.total_memory() as f64),
            ("FreeMemory".to_string(), system.free_memory() as f64),
            ("UsedMemory".to_string(), system.used_memory() as f64),
            ("AvailableMemory".to_string(), system.available_memory() as f64),
            ("TotalSwap".to_string(), system.total_swap() as f64),
            ("UsedSwap".to_string(), system.used_swap() as f64),
            ("CPUUtilization".to_string(), system.global_cpu_usage() as f64),
        ];
        for (i, cpu) in system.cpus().iter().enumerate() {
            gauges.push((format!("CPUUtilization{}", i + 1), cpu.cpu_usage() as f64));
        }
        gauges
    }

    /// Record a counter increment outside the regular poll
    pub async fn add_counter(&self, name: &str, delta: i64) {
        let mut buffer = self.buffer.lock().await;
        let pending = buffer.pending.entry(name.to_string()).or_insert(0);
        *pending = pending.saturating_add(delta);
    }

    /// Current gauges plus counter deltas since the last hand-off.
    ///
    /// Pending deltas are reset; hand them back with [`Self::requeue`] if
    /// delivery fails.
    pub async fn drain_batch(&self) -> Vec<Metric> {
        let mut buffer = self.buffer.lock().await;
        let pending = std::mem::take(&mut buffer.pending);

        buffer
            .gauges
            .iter()
            .map(|(name, value)| Metric::gauge(name.clone(), *value))
            .chain(
                pending
                    .into_iter()
                    .filter(|(_, delta)| *delta != 0)
                    .map(|(name, delta)| Metric::counter(name, delta)),
            )
            .collect()
    }

    /// Return undelivered counter deltas to the buffer
    pub async fn requeue(&self, batch: &[Metric]) {
        let mut buffer = self.buffer.lock().await;
        for metric in batch {
            if let Ok(MetricValue::Counter(delta)) = metric.validate() {
                let pending = buffer.pending.entry(metric.id.clone()).or_insert(0);
                *pending = pending.saturating_add(delta);
            }
        }
    }
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(batch: &[Metric], name: &str) -> Option<i64> {
        batch.iter().find(|m| m.id == name).and_then(|m| m.delta)
    }

    #[tokio::test]
    async fn test_poll_gathers_gauges_and_counts() {
        let collector = RuntimeCollector::new();
        collector.poll().await;
        collector.poll().await;

        let batch = collector.drain_batch().await;
        assert_eq!(counter(&batch, POLL_COUNT), Some(2));

        for name in [RANDOM_VALUE, "Uptime", "TotalMemory", "CPUUtilization"] {
            let gauge = batch.iter().find(|m| m.id == name).unwrap();
            assert!(gauge.value.unwrap().is_finite(), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_drain_resets_counter_deltas() {
        let collector = RuntimeCollector::new();
        collector.poll().await;
        assert_eq!(counter(&collector.drain_batch().await, POLL_COUNT), Some(1));

        let second = collector.drain_batch().await;
        assert_eq!(counter(&second, POLL_COUNT), None);
        assert!(second.iter().any(|m| m.id == RANDOM_VALUE));

        collector.poll().await;
        assert_eq!(counter(&collector.drain_batch().await, POLL_COUNT), Some(1));
    }

    #[tokio::test]
    async fn test_requeue_restores_undelivered_deltas() {
        let collector = RuntimeCollector::new();
        collector.poll().await;
        collector.add_counter("Errors", 3).await;

        let failed = collector.drain_batch().await;
        collector.poll().await;
        collector.requeue(&failed).await;

        let batch = collector.drain_batch().await;
        assert_eq!(counter(&batch, POLL_COUNT), Some(2));
        assert_eq!(counter(&batch, "Errors"), Some(3));
    }
}
