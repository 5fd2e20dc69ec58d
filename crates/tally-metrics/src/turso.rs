//! Relational backend using Turso.
//!
//! Layout:
//!   - one `metrics` table keyed by (name, type)
//!   - gauges fill `value`, counters fill `delta`, the other column stays NULL
//!   - every save is one transaction of upserts, so a snapshot lands whole or
//!     not at all

use async_trait::async_trait;
use std::path::Path;
use tally_core::{MetricKind, Result, Snapshot, TallyError};
use tokio::sync::Mutex;
use tracing::debug;
use turso::{params, Builder, Connection};

use crate::backend::DurableBackend;

const SCHEMA: &str = r#"CREATE TABLE IF NOT EXISTS metrics (
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    value REAL,
    delta INTEGER,
    PRIMARY KEY (name, type)
)"#;

/// Insert-or-update for one metric; parameters are (name, type, value, delta)
const UPSERT_METRIC: &str = r#"
    INSERT INTO metrics (name, type, value, delta)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(name, type) DO UPDATE SET
        value = excluded.value,
        delta = excluded.delta
"#;

const SELECT_ALL: &str = "SELECT name, type, value, delta FROM metrics";

/// Turso-backed [`DurableBackend`]
pub struct TursoBackend {
    conn: Mutex<Connection>,
    path: String,
    synchronous: bool,
}

fn db_error(e: turso::Error) -> TallyError {
    TallyError::Persistence(format!("turso: {}", e))
}

impl TursoBackend {
    /// Open (creating if needed) the database at `dsn` and provision the schema.
    ///
    /// `dsn` is a local database path, optionally prefixed with `file:`.
    pub async fn open(dsn: &str, synchronous: bool) -> Result<Self> {
        let path = dsn.strip_prefix("file:").unwrap_or(dsn).to_string();

        if path != ":memory:" {
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| TallyError::Persistence(e.to_string()))?;
                }
            }
        }

        let db = Builder::new_local(&path).build().await.map_err(db_error)?;
        let conn = db.connect().map_err(db_error)?;

        let backend = Self {
            conn: Mutex::new(conn),
            path,
            synchronous,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Idempotent: safe to call on every start
    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let _ = conn
            .query("PRAGMA busy_timeout=5000", params![])
            .await
            .map_err(db_error)?;
        conn.execute(SCHEMA, params![]).await.map_err(db_error)?;
        Ok(())
    }

    /// Number of stored rows
    pub async fn row_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM metrics", params![])
            .await
            .map_err(db_error)?;

        match rows.next().await.map_err(db_error)? {
            Some(row) => row.get(0).map_err(db_error),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl DurableBackend for TursoBackend {
    fn name(&self) -> &'static str {
        "turso"
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().await.map_err(db_error)?;

        let mut outcome = Ok(());
        for metric in snapshot.metrics() {
            let result = tx
                .execute(
                    UPSERT_METRIC,
                    params![
                        metric.id.clone(),
                        metric.kind.as_str(),
                        metric.value,
                        metric.delta
                    ],
                )
                .await;
            if let Err(e) = result {
                outcome = Err(db_error(e));
                break;
            }
        }

        match outcome {
            Ok(()) => {
                tx.commit().await.map_err(db_error)?;
                debug!("Saved {} metrics to {}", snapshot.len(), self.path);
                Ok(())
            }
            Err(e) => {
                tx.rollback().await.map_err(db_error)?;
                Err(e)
            }
        }
    }

    async fn restore(&self) -> Result<Snapshot> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query(SELECT_ALL, params![]).await.map_err(db_error)?;

        let mut snapshot = Snapshot::default();
        while let Some(row) = rows.next().await.map_err(db_error)? {
            let name: String = row.get(0).map_err(db_error)?;
            let kind: String = row.get(1).map_err(db_error)?;
            let value: Option<f64> = row.get(2).map_err(db_error)?;
            let delta: Option<i64> = row.get(3).map_err(db_error)?;

            let kind: MetricKind = kind
                .parse()
                .map_err(|e| TallyError::Persistence(format!("row {}: {}", name, e)))?;

            match (kind, value, delta) {
                (MetricKind::Gauge, Some(value), _) => {
                    snapshot.gauges.insert(name, value);
                }
                (MetricKind::Counter, _, Some(delta)) => {
                    snapshot.counters.insert(name, delta);
                }
                (kind, _, _) => {
                    return Err(TallyError::Persistence(format!(
                        "{} row {} has no stored value",
                        kind, name
                    )));
                }
            }
        }

        debug!("Restored {} metrics from {}", snapshot.len(), self.path);
        Ok(snapshot)
    }

    fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query("SELECT 1", params![]).await.map_err(db_error)?;
        rows.next().await.map_err(db_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Turso Connection doesn't require explicit close in Rust;
        // taking the lock waits out any in-flight transaction
        let _conn = self.conn.lock().await;
        debug!("Closed turso backend {}", self.path);
        Ok(())
    }
}
