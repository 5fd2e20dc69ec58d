//! Persistence orchestration
//!
//! The [`Persister`] is the only writer of the aggregate store and the only
//! component that triggers backend saves. In write-through mode every
//! mutation is saved before it returns; in interval mode a ticker saves on a
//! fixed period. Either way a failed save is logged and the mutation still
//! succeeds: the in-memory store is authoritative while the process runs.

use std::sync::Arc;
use std::time::Duration;
use tally_core::fail_open::fail_open;
use tally_core::{Metric, MetricKind, MetricValue, RawReading, Result, Snapshot, TallyError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::DurableBackend;
use crate::store::MetricStore;

/// Store plus optional durable backend
#[derive(Clone)]
pub struct Persister {
    store: MetricStore,
    backend: Option<Arc<dyn DurableBackend>>,
    /// Held across snapshot + save so saves land in snapshot order
    save_order: Arc<Mutex<()>>,
}

impl Persister {
    pub fn new(store: MetricStore, backend: Option<Arc<dyn DurableBackend>>) -> Self {
        Self {
            store,
            backend,
            save_order: Arc::new(Mutex::new(())),
        }
    }

    /// Store without any durable backend
    pub fn in_memory() -> Self {
        Self::new(MetricStore::new(), None)
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn backend(&self) -> Option<&Arc<dyn DurableBackend>> {
        self.backend.as_ref()
    }

    pub fn is_synchronous(&self) -> bool {
        self.backend
            .as_ref()
            .map(|b| b.is_synchronous())
            .unwrap_or(false)
    }

    pub async fn apply_gauge(&self, name: &str, value: f64) -> f64 {
        let stored = self.store.set_gauge(name, value).await;
        self.persist_if_synchronous().await;
        stored
    }

    pub async fn apply_counter(&self, name: &str, delta: i64) -> Result<i64> {
        let stored = self.store.increment_counter(name, delta).await?;
        self.persist_if_synchronous().await;
        Ok(stored)
    }

    /// Resolve a textual reading, then apply it
    pub async fn apply_raw(&self, name: &str, reading: &RawReading) -> Result<MetricValue> {
        if name.trim().is_empty() {
            return Err(TallyError::Validation("metric name is empty".to_string()));
        }
        let value = reading.parse()?;
        let stored = self.store.apply(name, value).await?;
        self.persist_if_synchronous().await;
        Ok(stored)
    }

    /// Apply one wire sample, returning it with the stored value filled in
    pub async fn apply_metric(&self, metric: &Metric) -> Result<Metric> {
        let mut applied = self.apply_batch(std::slice::from_ref(metric)).await?;
        applied
            .pop()
            .ok_or_else(|| TallyError::Other("empty batch result".to_string()))
    }

    /// Validate every sample, then apply them all in order.
    ///
    /// One invalid sample rejects the batch and nothing is applied.
    pub async fn apply_batch(&self, samples: &[Metric]) -> Result<Vec<Metric>> {
        let batch = samples
            .iter()
            .map(|m| m.validate().map(|value| (m.id.clone(), value)))
            .collect::<Result<Vec<_>>>()?;

        let stored = self.store.apply_batch(&batch).await?;
        self.persist_if_synchronous().await;

        Ok(batch
            .into_iter()
            .zip(stored)
            .map(|((name, _), value)| Metric::from_value(name, value))
            .collect())
    }

    pub async fn gauge(&self, name: &str) -> Result<f64> {
        self.store.gauge(name).await
    }

    pub async fn counter(&self, name: &str) -> Result<i64> {
        self.store.counter(name).await
    }

    pub async fn get(&self, kind: MetricKind, name: &str) -> Result<MetricValue> {
        self.store.get(kind, name).await
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.store.snapshot().await
    }

    /// Snapshot the store and save it now.
    ///
    /// The store lock is released before the backend is touched. Concurrent
    /// flushes are serialized, so a later snapshot is never overwritten by an
    /// earlier one.
    pub async fn flush(&self) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let _order = self.save_order.lock().await;
        let snapshot = self.store.snapshot().await;
        backend.save(&snapshot).await?;
        debug!("Flushed {} metrics to {} backend", snapshot.len(), backend.name());
        Ok(())
    }

    async fn persist_if_synchronous(&self) {
        if self.is_synchronous() {
            fail_open("write-through save", || self.flush()).await;
        }
    }

    /// Load the stored snapshot into the store before serving traffic.
    ///
    /// Any failure to read the snapshot is returned as `TallyError::Startup`.
    /// A missing or empty snapshot leaves the store empty.
    pub async fn restore_on_startup(&self, enabled: bool) -> Result<()> {
        if !enabled {
            info!("Snapshot restore disabled, starting empty");
            return Ok(());
        }
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let snapshot = backend.restore().await.map_err(|e| {
            TallyError::Startup(format!("cannot restore from {} backend: {}", backend.name(), e))
        })?;

        info!(
            "Restored {} gauges and {} counters from {} backend",
            snapshot.gauges.len(),
            snapshot.counters.len(),
            backend.name()
        );
        self.store.restore(snapshot).await;
        Ok(())
    }

    /// Save on a fixed period until `shutdown` is cancelled, then save once more.
    ///
    /// Returns `None` without a backend or for a zero interval.
    pub fn start_durability_ticker(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.backend.is_none() || interval.is_zero() {
            return None;
        }

        let persister = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        fail_open("periodic save", || persister.flush()).await;
                    }
                    _ = shutdown.cancelled() => {
                        info!("Durability ticker stopping");
                        fail_open("final periodic save", || persister.flush()).await;
                        break;
                    }
                }
            }
        }))
    }

    pub async fn ping(&self) -> Result<()> {
        match &self.backend {
            Some(backend) => backend.ping().await,
            None => Ok(()),
        }
    }

    /// Final save, then release the backend
    pub async fn shutdown(&self) -> Result<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        if let Err(e) = self.flush().await {
            warn!("Final save before shutdown failed: {}", e);
        }
        backend.close().await
    }
}
