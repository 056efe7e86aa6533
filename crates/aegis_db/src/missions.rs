//! Mission persistence and dispatch statistics.
//!
//! A mission and the status flip of every source it covers commit in one
//! transaction. `mission_sources` enforces at most one mission per
//! (incident, dispatch round); a clash means an earlier attempt already
//! wrote the mission and only the incident rows need repair.

use aegis_protocol::{IncidentId, IncidentKind, Mission, MissionId, Route, StationInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::error::{DbError, Result};
use crate::incidents::Claim;
use crate::AegisDb;

/// Result of [`AegisDb::persist_mission`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Mission written and all sources flipped to `Assigned`.
    Persisted(MissionId),
    /// A mission already existed for this dispatch round. Sources still
    /// held by the caller were pointed at it.
    AlreadyDispatched(MissionId),
    /// At least one claim was taken over; nothing was written.
    ClaimLost,
}

/// Where an incident was sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub mission_id: MissionId,
    pub station: StationInfo,
    pub assigned_at: DateTime<Utc>,
}

/// Snapshot counters for `aegis stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub incidents: i64,
    pub unassigned: i64,
    pub pending: i64,
    pub processing: i64,
    pub assigned: i64,
    pub errored: i64,
    pub missions: i64,
}

impl AegisDb {
    /// Write a mission and assign its sources, all or nothing.
    pub async fn persist_mission(&self, mission: &Mission, claims: &[Claim]) -> Result<PersistOutcome> {
        if claims.is_empty() {
            return Err(DbError::invalid_state("mission has no claimed sources"));
        }

        let now = Self::now_millis();
        let station_json = serde_json::to_string(&mission.station)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO missions (id, source_kind, source_ids, routes, station, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mission.id.as_str())
        .bind(mission.source_kind.as_str())
        .bind(serde_json::to_string(&mission.source_ids)?)
        .bind(serde_json::to_string(&mission.routes)?)
        .bind(&station_json)
        .bind(&mission.status)
        .bind(mission.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for claim in claims {
            let inserted = sqlx::query(
                "INSERT INTO mission_sources (incident_id, dispatch_round, mission_id) VALUES (?, ?, ?)",
            )
            .bind(claim.incident_id.as_str())
            .bind(claim.dispatch_round)
            .bind(mission.id.as_str())
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                let err = DbError::from(e);
                if !err.is_unique_violation() {
                    return Err(err);
                }
                tx.rollback().await?;
                return self.heal_duplicate(claim, claims).await;
            }
        }

        for claim in claims {
            let flipped = sqlx::query(
                r#"
                UPDATE incidents SET
                    dispatch_status = 'Assigned',
                    status = CASE WHEN kind = 'need' THEN 'InProgress' ELSE status END,
                    mission_id = ?,
                    assigned_at = ?,
                    assigned_station = ?,
                    prior_dispatch_status = NULL,
                    claim_token = NULL,
                    claimed_by = NULL,
                    claim_time = NULL,
                    updated_at = ?
                WHERE id = ? AND claim_token = ?
                "#,
            )
            .bind(mission.id.as_str())
            .bind(now)
            .bind(&station_json)
            .bind(now)
            .bind(claim.incident_id.as_str())
            .bind(claim.token.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if flipped == 0 {
                tx.rollback().await?;
                warn!(
                    incident_id = %claim.incident_id,
                    mission_id = %mission.id,
                    "Claim taken over before mission commit, discarding mission"
                );
                return Ok(PersistOutcome::ClaimLost);
            }
        }

        tx.commit().await?;

        info!(
            mission_id = %mission.id,
            station = %mission.station.name,
            sources = claims.len(),
            "Mission persisted"
        );
        Ok(PersistOutcome::Persisted(mission.id.clone()))
    }

    async fn heal_duplicate(&self, clashing: &Claim, claims: &[Claim]) -> Result<PersistOutcome> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT mission_id FROM mission_sources WHERE incident_id = ? AND dispatch_round = ?",
        )
        .bind(clashing.incident_id.as_str())
        .bind(clashing.dispatch_round)
        .fetch_optional(&self.pool)
        .await?;

        let existing = existing.ok_or_else(|| {
            DbError::invalid_state(format!(
                "dedupe clash for {} but no mission recorded",
                clashing.incident_id
            ))
        })?;
        let mission_id =
            MissionId::parse(&existing).map_err(|e| DbError::invalid_state(e.to_string()))?;

        let healed = self.bulk_mark_assigned(&mission_id, claims).await?;
        info!(
            incident_id = %clashing.incident_id,
            mission_id = %mission_id,
            healed,
            "Mission already existed for this dispatch round"
        );
        Ok(PersistOutcome::AlreadyDispatched(mission_id))
    }

    /// Point every still-held claim at an existing mission.
    ///
    /// Returns the number of incidents updated.
    pub async fn bulk_mark_assigned(&self, mission_id: &MissionId, claims: &[Claim]) -> Result<u64> {
        let mission = self
            .get_mission(mission_id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("mission {}", mission_id)))?;
        let station_json = serde_json::to_string(&mission.station)?;
        let now = Self::now_millis();

        let mut updated = 0;
        for claim in claims {
            updated += sqlx::query(
                r#"
                UPDATE incidents SET
                    dispatch_status = 'Assigned',
                    status = CASE WHEN kind = 'need' THEN 'InProgress' ELSE status END,
                    mission_id = ?,
                    assigned_at = ?,
                    assigned_station = ?,
                    prior_dispatch_status = NULL,
                    claim_token = NULL,
                    claimed_by = NULL,
                    claim_time = NULL,
                    updated_at = ?
                WHERE id = ? AND claim_token = ?
                "#,
            )
            .bind(mission_id.as_str())
            .bind(now)
            .bind(&station_json)
            .bind(now)
            .bind(claim.incident_id.as_str())
            .bind(claim.token.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        }

        debug!(mission_id = %mission_id, updated, "Sources marked assigned");
        Ok(updated)
    }

    pub async fn get_mission(&self, id: &MissionId) -> Result<Option<Mission>> {
        let row = sqlx::query("SELECT * FROM missions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_mission).transpose()
    }

    /// Every mission created for an incident, oldest dispatch round first.
    pub async fn missions_for_incident(&self, id: &IncidentId) -> Result<Vec<Mission>> {
        let rows = sqlx::query(
            r#"
            SELECT m.* FROM missions m
            JOIN mission_sources s ON s.mission_id = m.id
            WHERE s.incident_id = ?
            ORDER BY s.dispatch_round ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_mission).collect()
    }

    /// Most recent missions first.
    pub async fn list_missions(&self, limit: u32) -> Result<Vec<Mission>> {
        let rows = sqlx::query("SELECT * FROM missions ORDER BY created_at DESC, id ASC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_mission).collect()
    }

    /// Current assignment of an incident, if it has been dispatched.
    pub async fn assignment(&self, id: &IncidentId) -> Result<Option<Assignment>> {
        let row = sqlx::query(
            "SELECT mission_id, assigned_station, assigned_at FROM incidents WHERE id = ? AND mission_id IS NOT NULL",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mission_id: String = row.try_get("mission_id")?;
        let station: String = row.try_get("assigned_station")?;
        let assigned_at: i64 = row.try_get("assigned_at")?;

        Ok(Some(Assignment {
            mission_id: MissionId::parse(&mission_id)
                .map_err(|e| DbError::invalid_state(e.to_string()))?,
            station: serde_json::from_str(&station)?,
            assigned_at: Self::millis_to_datetime(assigned_at),
        }))
    }

    pub async fn stats(&self) -> Result<DispatchStats> {
        let mut stats = DispatchStats::default();

        let rows = sqlx::query(
            r#"
            SELECT COALESCE(dispatch_status, 'Unassigned') AS dispatch, COUNT(*) AS n
            FROM incidents
            GROUP BY dispatch
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let dispatch: String = row.try_get("dispatch")?;
            let n: i64 = row.try_get("n")?;
            stats.incidents += n;
            match dispatch.as_str() {
                "Unassigned" => stats.unassigned += n,
                "Pending" => stats.pending += n,
                "Processing" => stats.processing += n,
                "Assigned" => stats.assigned += n,
                other => warn!(dispatch_status = other, "Unknown dispatch status in store"),
            }
        }

        stats.errored = sqlx::query_scalar("SELECT COUNT(*) FROM incidents WHERE status = 'Error'")
            .fetch_one(&self.pool)
            .await?;
        stats.missions = sqlx::query_scalar("SELECT COUNT(*) FROM missions")
            .fetch_one(&self.pool)
            .await?;

        Ok(stats)
    }
}

fn row_to_mission(row: &SqliteRow) -> Result<Mission> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("source_kind")?;
    let source_ids: String = row.try_get("source_ids")?;
    let routes: String = row.try_get("routes")?;
    let station: String = row.try_get("station")?;
    let created_at: i64 = row.try_get("created_at")?;

    Ok(Mission {
        id: MissionId::parse(&id).map_err(|e| DbError::invalid_state(e.to_string()))?,
        source_kind: IncidentKind::parse(&kind)
            .ok_or_else(|| DbError::invalid_state(format!("Unknown source kind: {}", kind)))?,
        source_ids: serde_json::from_str::<Vec<IncidentId>>(&source_ids)?,
        routes: serde_json::from_str::<Vec<Route>>(&routes)?,
        station: serde_json::from_str(&station)?,
        status: row.try_get("status")?,
        created_at: AegisDb::millis_to_datetime(created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EligibilityFilter;
    use aegis_protocol::defaults::MISSION_STATUS_ACTIVE;
    use aegis_protocol::{Category, Coordinates, DispatchStatus, Incident, IncidentStatus, ManualOverride};
    use std::time::Duration;

    fn swargate() -> StationInfo {
        StationInfo {
            category: Category::Fire,
            name: "Fire Station - Swargate".to_string(),
            lat: 18.4549,
            lon: 73.8563,
        }
    }

    fn mission_for(incident: &Incident) -> Mission {
        let station = swargate();
        Mission {
            id: MissionId::new(),
            source_kind: incident.kind,
            source_ids: vec![incident.id.clone()],
            routes: vec![Route {
                geometry: vec![station.coordinates(), incident.coordinates.unwrap()],
                distance_m: 7500.0,
                duration_s: 675.0,
                road_snapped: false,
                station_category: station.category,
                station_name: station.name.clone(),
            }],
            station,
            status: MISSION_STATUS_ACTIVE.to_string(),
            created_at: Utc::now(),
        }
    }

    async fn claim_only(db: &AegisDb, worker: &str) -> Claim {
        let candidates = db
            .find_eligible(IncidentKind::Need, &EligibilityFilter::default())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        db.claim(&candidates[0], worker, Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_persist_assigns_sources() {
        let db = AegisDb::open_memory().await.unwrap();
        let need = Incident::new_need(Some(Coordinates::new(18.50, 73.80)), "house on fire", None);
        db.insert_incident(&need).await.unwrap();

        let claim = claim_only(&db, "worker-a").await;
        let mission = mission_for(&need);
        let outcome = db.persist_mission(&mission, &[claim]).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Persisted(mission.id.clone()));

        let stored = db.get_incident(&need.id).await.unwrap().unwrap();
        assert_eq!(stored.dispatch_status, Some(DispatchStatus::Assigned));
        assert_eq!(stored.status, IncidentStatus::InProgress);

        let assignment = db.assignment(&need.id).await.unwrap().unwrap();
        assert_eq!(assignment.mission_id, mission.id);
        assert_eq!(assignment.station, swargate());

        let loaded = db.get_mission(&mission.id).await.unwrap().unwrap();
        assert_eq!(loaded.routes, mission.routes);
        assert_eq!(loaded.source_ids, vec![need.id.clone()]);

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.missions, 1);
    }

    #[tokio::test]
    async fn test_lost_claim_writes_nothing() {
        let db = AegisDb::open_memory().await.unwrap();
        let need = Incident::new_need(Some(Coordinates::new(18.50, 73.80)), "trapped", None);
        db.insert_incident(&need).await.unwrap();

        let mut claim = claim_only(&db, "worker-a").await;
        claim.token = aegis_protocol::ClaimToken::new();

        let outcome = db.persist_mission(&mission_for(&need), &[claim]).await.unwrap();
        assert_eq!(outcome, PersistOutcome::ClaimLost);
        assert_eq!(db.stats().await.unwrap().missions, 0);
        assert!(db.missions_for_incident(&need.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_round_heals_incident() {
        let db = AegisDb::open_memory().await.unwrap();
        let need = Incident::new_need(Some(Coordinates::new(18.50, 73.80)), "smoke", None);
        db.insert_incident(&need).await.unwrap();

        let first = claim_only(&db, "worker-a").await;
        let mission = mission_for(&need);
        db.persist_mission(&mission, &[first]).await.unwrap();

        // An external writer resets the row without a re-route.
        sqlx::query(
            "UPDATE incidents SET dispatch_status = 'Unassigned', status = 'Verified', mission_id = NULL WHERE id = ?",
        )
        .bind(need.id.as_str())
        .execute(db.pool())
        .await
        .unwrap();

        let second = claim_only(&db, "worker-b").await;
        let outcome = db.persist_mission(&mission_for(&need), &[second]).await.unwrap();
        assert_eq!(outcome, PersistOutcome::AlreadyDispatched(mission.id.clone()));

        assert_eq!(db.stats().await.unwrap().missions, 1);
        let assignment = db.assignment(&need.id).await.unwrap().unwrap();
        assert_eq!(assignment.mission_id, mission.id);
    }

    #[tokio::test]
    async fn test_reroute_allows_second_mission() {
        let db = AegisDb::open_memory().await.unwrap();
        let need = Incident::new_need(Some(Coordinates::new(18.50, 73.80)), "fire", None);
        db.insert_incident(&need).await.unwrap();

        let first = claim_only(&db, "worker-a").await;
        db.persist_mission(&mission_for(&need), &[first]).await.unwrap();

        let manual = ManualOverride {
            category: Some("rescue".to_string()),
            ..Default::default()
        };
        db.request_reroute(&need.id, &manual).await.unwrap();

        let second = claim_only(&db, "worker-a").await;
        assert_eq!(second.dispatch_round, 1);
        let outcome = db.persist_mission(&mission_for(&need), &[second]).await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Persisted(_)));

        let history = db.missions_for_incident(&need.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(db.list_missions(10).await.unwrap().len(), 2);
    }
}
