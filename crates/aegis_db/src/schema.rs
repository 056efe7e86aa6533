//! Table definitions. All CREATE TABLE statements live here.

use crate::error::Result;
use crate::AegisDb;
use tracing::debug;

impl AegisDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_incident_tables().await?;
        self.create_station_tables().await?;
        self.create_mission_tables().await?;

        debug!("Database schema verified");
        Ok(())
    }

    /// Reports and needs share one table, split by `kind`.
    async fn create_incident_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                lat REAL,
                lon REAL,
                text TEXT NOT NULL DEFAULT '',
                hazard_tag TEXT,
                hazard_confidence REAL,
                needs TEXT NOT NULL DEFAULT '[]',
                need_type TEXT,
                details TEXT,
                severity INTEGER,
                status TEXT NOT NULL,
                rejected INTEGER NOT NULL DEFAULT 0,
                dispatch_status TEXT,
                dispatch_round INTEGER NOT NULL DEFAULT 0,
                manual_override TEXT,
                claim_token TEXT,
                claimed_by TEXT,
                claim_time INTEGER,
                prior_dispatch_status TEXT,
                mission_id TEXT,
                assigned_at INTEGER,
                assigned_station TEXT,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_incidents_dispatch ON incidents(kind, status, dispatch_status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Station registry; rowid order is registry order.
    async fn create_station_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS stations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                external_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stations_active ON stations(active, category)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Missions are append-only. `mission_sources` is the dedupe key: one row
    /// per (incident, dispatch round).
    async fn create_mission_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS missions (
                id TEXT PRIMARY KEY,
                source_kind TEXT NOT NULL,
                source_ids TEXT NOT NULL,
                routes TEXT NOT NULL,
                station TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS mission_sources (
                incident_id TEXT NOT NULL,
                dispatch_round INTEGER NOT NULL,
                mission_id TEXT NOT NULL REFERENCES missions(id),
                PRIMARY KEY (incident_id, dispatch_round)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
