//! Durable backend abstraction

use async_trait::async_trait;
use std::sync::Arc;
use tally_core::{Result, Snapshot, StorageTarget};
use tracing::info;

/// Secondary store for full snapshots of the aggregate store.
///
/// Implementations own their file handle or connection for the lifetime of
/// the process and release it in [`DurableBackend::close`].
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Replace whatever was stored with `snapshot`
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Read the stored snapshot; nothing stored yet is an empty snapshot
    async fn restore(&self) -> Result<Snapshot>;

    /// True when every mutation must be persisted before it returns
    fn is_synchronous(&self) -> bool;

    /// Health check used by the liveness route
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()>;
}

/// Open the backend a configuration points at.
///
/// Returns `None` when no storage is configured; the store then lives in
/// memory only.
pub async fn open_backend(
    target: &StorageTarget,
    synchronous: bool,
) -> Result<Option<Arc<dyn DurableBackend>>> {
    let backend: Arc<dyn DurableBackend> = match target {
        StorageTarget::None => {
            info!("No durable storage configured, metrics stay in memory");
            return Ok(None);
        }
        StorageTarget::File(path) => {
            Arc::new(crate::file::FileBackend::open(path, synchronous).await?)
        }
        #[cfg(feature = "turso")]
        StorageTarget::Database(dsn) => {
            Arc::new(crate::turso::TursoBackend::open(dsn, synchronous).await?)
        }
        #[cfg(not(feature = "turso"))]
        StorageTarget::Database(_) => {
            return Err(tally_core::TallyError::Config(
                "database storage requires the `turso` feature".to_string(),
            ));
        }
    };

    info!(
        "Opened {} backend ({})",
        backend.name(),
        if synchronous { "write-through" } else { "interval" }
    );
    Ok(Some(backend))
}
