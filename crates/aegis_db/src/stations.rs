//! Station registry.

use aegis_protocol::{Category, Coordinates, Station};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, warn};

use crate::error::{DbError, Result};
use crate::AegisDb;

impl AegisDb {
    /// Insert a station or update the one with the same name.
    ///
    /// Updating keeps the original rowid, so registry order is stable.
    pub async fn upsert_station(&self, station: &Station) -> Result<()> {
        station
            .coordinates
            .validate()
            .map_err(|e| DbError::invalid_state(format!("station '{}': {}", station.name, e)))?;

        let now = Self::now_millis();
        sqlx::query(
            r#"
            INSERT INTO stations (name, category, lat, lon, active, external_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                category = excluded.category,
                lat = excluded.lat,
                lon = excluded.lon,
                active = excluded.active,
                external_id = excluded.external_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&station.name)
        .bind(station.category.as_str())
        .bind(station.coordinates.lat)
        .bind(station.coordinates.lon)
        .bind(station.active)
        .bind(station.external_id.as_deref())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_station_active(&self, name: &str, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE stations SET active = ?, updated_at = ? WHERE name = ?")
            .bind(active)
            .bind(Self::now_millis())
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("station '{}'", name)));
        }

        info!(station = name, active, "Station availability changed");
        Ok(())
    }

    /// Active stations in registry order.
    ///
    /// Rows that cannot be decoded are logged and left out, so one bad
    /// registry entry does not hide every other station.
    pub async fn list_active_stations(&self) -> Result<Vec<Station>> {
        let rows = sqlx::query("SELECT * FROM stations WHERE active = 1 ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(decode_stations(&rows))
    }

    pub async fn list_stations(&self) -> Result<Vec<Station>> {
        let rows = sqlx::query("SELECT * FROM stations ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(decode_stations(&rows))
    }
}

fn decode_stations(rows: &[SqliteRow]) -> Vec<Station> {
    rows.iter()
        .filter_map(|row| match row_to_station(row) {
            Ok(station) => Some(station),
            Err(e) => {
                let row_id: Option<i64> = row.try_get("id").ok();
                warn!(row_id, error = %e, "Skipping unreadable station row");
                None
            }
        })
        .collect()
}

fn row_to_station(row: &SqliteRow) -> Result<Station> {
    let category_str: String = row.try_get("category")?;
    let category = Category::parse(&category_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown station category: {}", category_str)))?;

    let coordinates = Coordinates::new(row.try_get("lat")?, row.try_get("lon")?);
    coordinates.validate().map_err(DbError::invalid_state)?;

    Ok(Station {
        name: row.try_get("name")?,
        category,
        coordinates,
        active: row.try_get("active")?,
        external_id: row.try_get("external_id")?,
    })
}
