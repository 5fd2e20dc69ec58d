//! In-memory aggregate of gauges and counters

use std::collections::HashMap;
use std::sync::Arc;
use tally_core::{MetricKind, MetricValue, Result, Snapshot, TallyError};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Aggregates {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Aggregates {
    fn apply(&mut self, name: &str, value: MetricValue) -> Result<MetricValue> {
        match value {
            MetricValue::Gauge(v) => {
                self.gauges.insert(name.to_string(), v);
                Ok(MetricValue::Gauge(v))
            }
            MetricValue::Counter(delta) => self.add(name, delta).map(MetricValue::Counter),
        }
    }

    fn add(&mut self, name: &str, delta: i64) -> Result<i64> {
        let total = match self.counters.get(name) {
            Some(current) => current.checked_add(delta).ok_or_else(|| {
                TallyError::Validation(format!("counter {} would overflow", name))
            })?,
            None => delta,
        };
        self.counters.insert(name.to_string(), total);
        Ok(total)
    }
}

/// Concurrency-safe store of named gauges and counters.
///
/// Both maps sit behind one lock, so a snapshot can never see half of a
/// batch. Cloning the store clones the handle, not the data.
#[derive(Debug, Clone, Default)]
pub struct MetricStore {
    inner: Arc<RwLock<Aggregates>>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a gauge, returning the stored value
    pub async fn set_gauge(&self, name: &str, value: f64) -> f64 {
        let mut inner = self.inner.write().await;
        inner.gauges.insert(name.to_string(), value);
        value
    }

    /// Add to a counter (or start it at `delta`), returning the running total
    pub async fn increment_counter(&self, name: &str, delta: i64) -> Result<i64> {
        self.inner.write().await.add(name, delta)
    }

    /// Apply one typed reading, returning the value now stored
    pub async fn apply(&self, name: &str, value: MetricValue) -> Result<MetricValue> {
        self.inner.write().await.apply(name, value)
    }

    /// Apply a batch in order under a single lock acquisition.
    ///
    /// All or nothing: counter totals are checked for overflow before any
    /// entry is written.
    pub async fn apply_batch(&self, batch: &[(String, MetricValue)]) -> Result<Vec<MetricValue>> {
        let mut inner = self.inner.write().await;

        let mut staged: HashMap<&str, i64> = HashMap::new();
        for (name, value) in batch {
            if let MetricValue::Counter(delta) = value {
                let current = staged
                    .get(name.as_str())
                    .or_else(|| inner.counters.get(name))
                    .copied();
                let total = match current {
                    Some(current) => current.checked_add(*delta).ok_or_else(|| {
                        TallyError::Validation(format!("counter {} would overflow", name))
                    })?,
                    None => *delta,
                };
                staged.insert(name.as_str(), total);
            }
        }

        let mut stored = Vec::with_capacity(batch.len());
        for (name, value) in batch {
            stored.push(inner.apply(name, *value)?);
        }
        debug!("Applied batch of {} metrics", batch.len());
        Ok(stored)
    }

    pub async fn gauge(&self, name: &str) -> Result<f64> {
        let inner = self.inner.read().await;
        inner
            .gauges
            .get(name)
            .copied()
            .ok_or_else(|| TallyError::not_found(MetricKind::Gauge, name))
    }

    pub async fn counter(&self, name: &str) -> Result<i64> {
        let inner = self.inner.read().await;
        inner
            .counters
            .get(name)
            .copied()
            .ok_or_else(|| TallyError::not_found(MetricKind::Counter, name))
    }

    /// Look up either kind
    pub async fn get(&self, kind: MetricKind, name: &str) -> Result<MetricValue> {
        match kind {
            MetricKind::Gauge => self.gauge(name).await.map(MetricValue::Gauge),
            MetricKind::Counter => self.counter(name).await.map(MetricValue::Counter),
        }
    }

    /// Deep copy of both maps, taken under the shared lock
    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot {
            gauges: inner
                .gauges
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
            counters: inner
                .counters
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
        }
    }

    /// Replace both maps wholesale
    pub async fn restore(&self, snapshot: Snapshot) {
        let mut inner = self.inner.write().await;
        inner.gauges = snapshot.gauges.into_iter().collect();
        inner.counters = snapshot.counters.into_iter().collect();
        debug!(
            "Restored {} gauges and {} counters",
            inner.gauges.len(),
            inner.counters.len()
        );
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.gauges.len() + inner.counters.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
