//! Snapshot file backend
//!
//! One JSON record per file. Every save replaces the whole file by writing a
//! sibling temp file and renaming it over the target, so a crash mid-save
//! leaves the previous snapshot intact.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tally_core::{Result, Snapshot, TallyError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::DurableBackend;

/// File-based [`DurableBackend`]
pub struct FileBackend {
    path: PathBuf,
    synchronous: bool,
    /// Serializes writers so two saves never share the temp file
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (creating if missing) the snapshot file at `path`
    pub async fn open(path: impl AsRef<Path>, synchronous: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(persistence)?;
            }
        }

        // Create empty if absent, never truncate an existing snapshot
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(persistence)?;

        Ok(Self {
            path,
            synchronous,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn persistence(e: std::io::Error) -> TallyError {
    TallyError::Persistence(e.to_string())
}

#[async_trait]
impl DurableBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let encoded = serde_json::to_vec(snapshot)?;
        let _guard = self.write_lock.lock().await;

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await.map_err(persistence)?;
        file.write_all(&encoded).await.map_err(persistence)?;
        file.sync_all().await.map_err(persistence)?;
        drop(file);

        fs::rename(&temp, &self.path).await.map_err(persistence)?;

        debug!("Saved {} metrics to {:?}", snapshot.len(), self.path);
        Ok(())
    }

    async fn restore(&self) -> Result<Snapshot> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => return Err(persistence(e)),
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Snapshot::default());
        }

        serde_json::from_slice(&content).map_err(|e| {
            TallyError::Persistence(format!("corrupt snapshot {:?}: {}", self.path, e))
        })
    }

    fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    async fn ping(&self) -> Result<()> {
        fs::metadata(&self.path).await.map_err(persistence)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Saves are complete files; waiting for an in-flight one is enough
        let _guard = self.write_lock.lock().await;
        debug!("Closed file backend {:?}", self.path);
        Ok(())
    }
}
