//! Store for the Aegis dispatch service.
//!
//! Incidents (reports and needs), the station registry and missions live in
//! one SQLite database. Coordinators in separate processes share the file;
//! the only cross-process coordination is the compare-and-set claim in
//! [`AegisDb::claim`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use aegis_db::{AegisDb, EligibilityFilter};
//! use aegis_protocol::IncidentKind;
//!
//! let db = AegisDb::open("~/.aegis/aegis.sqlite3").await?;
//! let candidates = db.find_eligible(IncidentKind::Report, &EligibilityFilter::default()).await?;
//! ```

mod error;
mod incidents;
mod missions;
mod schema;
mod stations;

pub use error::{DbError, Result};
pub use incidents::{Candidate, Claim, EligibilityFilter};
pub use missions::{Assignment, DispatchStats, PersistOutcome};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the dispatch database. Cheap to clone.
#[derive(Clone)]
pub struct AegisDb {
    pool: SqlitePool,
}

impl AegisDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, 5).await
    }

    /// Open with an explicit pool size.
    pub async fn open_with(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Private in-memory database (tests, dry runs).
    ///
    /// Single connection: every pooled connection to `:memory:` would
    /// otherwise see its own empty database.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Underlying pool (escape hatch for tests and ad-hoc queries).
    ///
    /// Prefer the typed methods.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap round trip used to detect a dead store before a cycle.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl AegisDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("aegis.sqlite3");

        let db = AegisDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());
        db.ping().await.unwrap();

        db.close().await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("aegis.sqlite3");

        AegisDb::open(&db_path).await.unwrap().close().await;
        let db = AegisDb::open(&db_path).await.unwrap();
        let stats = db.stats().await.unwrap();
        assert_eq!(stats.missions, 0);
    }
}
