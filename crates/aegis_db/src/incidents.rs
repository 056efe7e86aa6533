//! Incident intake, eligibility and claim operations.
//!
//! The claim is a single `UPDATE ... WHERE` compare-and-set on the dispatch
//! status and claim token observed by [`AegisDb::find_eligible`]. Two
//! coordinators racing on the same row cannot both see `rows_affected == 1`.

use std::time::Duration;

use aegis_protocol::defaults::DEFAULT_CLAIM_LEASE_SECS;
use aegis_protocol::{
    ClaimToken, Coordinates, DispatchStatus, HazardTag, Incident, IncidentId, IncidentKind,
    IncidentStatus, ManualOverride,
};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Decode, Row, Type};
use tracing::{debug, info, warn};

use crate::error::{DbError, Result};
use crate::AegisDb;

/// Extra conditions applied by [`AegisDb::find_eligible`].
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    /// Reports need `severity > min_severity` when set. Ignored for needs.
    pub min_severity: Option<i64>,
    /// `Processing` rows whose claim is older than this are eligible again.
    pub claim_lease: Duration,
    pub limit: Option<u32>,
}

impl Default for EligibilityFilter {
    fn default() -> Self {
        Self {
            min_severity: None,
            claim_lease: Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS),
            limit: None,
        }
    }
}

/// Eligible row as observed at query time.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub incident: Incident,
    /// Token of an abandoned claim, if the row is being taken over.
    pub observed_token: Option<String>,
    /// Set when a stored field could not be decoded; such rows are never
    /// going to dispatch and should be marked `Error`.
    pub malformed: Option<String>,
}

/// Proof of a won claim. Required for every write that closes the claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub incident_id: IncidentId,
    pub token: ClaimToken,
    pub dispatch_round: i64,
}

const DISPATCH_OPEN_CLAUSE: &str = "(dispatch_status IS NULL \
     OR dispatch_status IN ('Unassigned', 'Pending') \
     OR (dispatch_status = 'Processing' AND claim_time < ?))";

impl AegisDb {
    // ========================================================================
    // Intake
    // ========================================================================

    /// Record a report or need produced by intake.
    pub async fn insert_incident(&self, incident: &Incident) -> Result<()> {
        let now = Self::now_millis();
        let needs = serde_json::to_string(&incident.needs)?;
        let manual_override = incident
            .manual_override
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO incidents (
                id, kind, lat, lon, text, hazard_tag, hazard_confidence, needs,
                need_type, details, severity, status, dispatch_status, dispatch_round,
                manual_override, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident.id.as_str())
        .bind(incident.kind.as_str())
        .bind(incident.coordinates.map(|c| c.lat))
        .bind(incident.coordinates.map(|c| c.lon))
        .bind(&incident.text)
        .bind(incident.tag.as_ref().map(|t| t.tag.as_str()))
        .bind(incident.tag.as_ref().map(|t| t.confidence))
        .bind(needs)
        .bind(incident.need_type.as_deref())
        .bind(incident.details.as_deref())
        .bind(incident.severity)
        .bind(incident.status.as_str())
        .bind(incident.dispatch_status.map(|s| s.as_str()))
        .bind(incident.dispatch_round)
        .bind(manual_override)
        .bind(incident.created_at.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(incident_id = %incident.id, kind = %incident.kind, "Incident recorded");
        Ok(())
    }

    /// Record a volunteer-verified need.
    pub async fn insert_need(&self, need: &Incident) -> Result<()> {
        if need.kind != IncidentKind::Need {
            return Err(DbError::invalid_state(format!(
                "incident {} is a {}, not a need",
                need.id, need.kind
            )));
        }
        self.insert_incident(need).await
    }

    /// Flag an incident as rejected by intake review.
    pub async fn reject_incident(&self, id: &IncidentId) -> Result<()> {
        let result = sqlx::query("UPDATE incidents SET rejected = 1, updated_at = ? WHERE id = ?")
            .bind(Self::now_millis())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("incident {}", id)));
        }
        Ok(())
    }

    pub async fn get_incident(&self, id: &IncidentId) -> Result<Option<Incident>> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let candidate = row_to_candidate(&row).map_err(DbError::invalid_state)?;
                Ok(Some(candidate.incident))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Eligibility & claims
    // ========================================================================

    /// Items of `kind` the coordinator should process this cycle, oldest first.
    pub async fn find_eligible(
        &self,
        kind: IncidentKind,
        filter: &EligibilityFilter,
    ) -> Result<Vec<Candidate>> {
        let statuses = IncidentStatus::dispatchable(kind);
        let placeholders = vec!["?"; statuses.len()].join(", ");

        let mut sql = format!(
            "SELECT rowid AS row_ref, * FROM incidents WHERE kind = ? AND rejected = 0 AND status IN ({}) AND {}",
            placeholders, DISPATCH_OPEN_CLAUSE
        );
        let min_severity = match kind {
            IncidentKind::Report => filter.min_severity,
            IncidentKind::Need => None,
        };
        if min_severity.is_some() {
            sql.push_str(" AND severity > ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql).bind(kind.as_str());
        for status in statuses {
            query = query.bind(status.as_str());
        }
        query = query.bind(stale_cutoff(filter.claim_lease));
        if let Some(min) = min_severity {
            query = query.bind(min);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_candidate(row) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => self.quarantine_row(row, &reason).await?,
            }
        }
        Ok(candidates)
    }

    /// Mark a row that cannot be identified as `Error`, addressing it by rowid.
    async fn quarantine_row(&self, row: &SqliteRow, reason: &str) -> Result<()> {
        let row_ref: i64 = match row.try_get("row_ref") {
            Ok(row_ref) => row_ref,
            Err(e) => {
                warn!(error = %e, reason, "Skipping unreadable incident row");
                return Ok(());
            }
        };

        warn!(rowid = row_ref, reason, "Marking unreadable incident row as Error");
        sqlx::query(
            "UPDATE incidents SET status = 'Error', error_message = ?, updated_at = ? WHERE rowid = ?",
        )
        .bind(format!("unreadable row: {}", reason))
        .bind(Self::now_millis())
        .bind(row_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically move a candidate to `Processing`.
    ///
    /// Returns `None` when another coordinator changed the row since it was
    /// observed (claimed it, finished it, or intake rejected it).
    pub async fn claim(
        &self,
        candidate: &Candidate,
        worker_id: &str,
        claim_lease: Duration,
    ) -> Result<Option<Claim>> {
        let incident = &candidate.incident;
        let token = ClaimToken::new();
        let now = Self::now_millis();

        let rows = sqlx::query(
            r#"
            UPDATE incidents SET
                prior_dispatch_status = CASE
                    WHEN dispatch_status = 'Processing' THEN prior_dispatch_status
                    ELSE dispatch_status
                END,
                dispatch_status = 'Processing',
                claim_token = ?1,
                claimed_by = ?2,
                claim_time = ?3,
                updated_at = ?3
            WHERE id = ?4
              AND dispatch_status IS ?5
              AND claim_token IS ?6
              AND dispatch_round = ?7
              AND rejected = 0
              AND status != 'Error'
              AND (dispatch_status IS NOT 'Processing' OR claim_time < ?8)
            "#,
        )
        .bind(token.as_str())
        .bind(worker_id)
        .bind(now)
        .bind(incident.id.as_str())
        .bind(incident.dispatch_status.map(|s| s.as_str()))
        .bind(candidate.observed_token.as_deref())
        .bind(incident.dispatch_round)
        .bind(stale_cutoff(claim_lease))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            debug!(incident_id = %incident.id, "Claim lost to another coordinator");
            return Ok(None);
        }

        if incident.dispatch_status == Some(DispatchStatus::Processing) {
            info!(incident_id = %incident.id, worker_id, "Took over abandoned claim");
        }

        Ok(Some(Claim {
            incident_id: incident.id.clone(),
            token,
            dispatch_round: incident.dispatch_round,
        }))
    }

    /// Give a claimed item back, restoring the dispatch status it had before
    /// the claim. Returns false if the claim was no longer held.
    pub async fn release_claim(&self, claim: &Claim) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE incidents SET
                dispatch_status = prior_dispatch_status,
                prior_dispatch_status = NULL,
                claim_token = NULL,
                claimed_by = NULL,
                claim_time = NULL,
                updated_at = ?
            WHERE id = ? AND claim_token = ?
            "#,
        )
        .bind(Self::now_millis())
        .bind(claim.incident_id.as_str())
        .bind(claim.token.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    /// Permanently exclude a claimed item from polling.
    pub async fn mark_error(&self, claim: &Claim, message: &str) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE incidents SET
                status = 'Error',
                error_message = ?,
                dispatch_status = prior_dispatch_status,
                prior_dispatch_status = NULL,
                claim_token = NULL,
                claimed_by = NULL,
                claim_time = NULL,
                updated_at = ?
            WHERE id = ? AND claim_token = ?
            "#,
        )
        .bind(message)
        .bind(Self::now_millis())
        .bind(claim.incident_id.as_str())
        .bind(claim.token.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    // ========================================================================
    // Human override
    // ========================================================================

    /// Store a manual re-route and reset the item to `Pending`.
    ///
    /// Bumps the dispatch round so the next mission does not collide with
    /// the previous one's dedupe key. A need that already went `InProgress`
    /// is put back to `Verified`, and an item marked `Error` returns to its
    /// dispatchable status, so the operator's correction is picked up.
    pub async fn request_reroute(
        &self,
        id: &IncidentId,
        manual_override: &ManualOverride,
    ) -> Result<()> {
        let payload = serde_json::to_string(manual_override)?;

        let rows = sqlx::query(
            r#"
            UPDATE incidents SET
                manual_override = ?,
                dispatch_status = 'Pending',
                dispatch_round = dispatch_round + 1,
                status = CASE
                    WHEN kind = 'need' AND status IN ('InProgress', 'Error') THEN 'Verified'
                    WHEN kind = 'report' AND status = 'Error' THEN 'Analyzed'
                    ELSE status
                END,
                error_message = NULL,
                updated_at = ?
            WHERE id = ? AND dispatch_status IS NOT 'Processing'
            "#,
        )
        .bind(payload)
        .bind(Self::now_millis())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return match self.get_incident(id).await? {
                None => Err(DbError::not_found(format!("incident {}", id))),
                Some(_) => Err(DbError::invalid_state(format!(
                    "incident {} is being dispatched right now; retry shortly",
                    id
                ))),
            };
        }

        info!(incident_id = %id, "Re-route requested");
        Ok(())
    }
}

fn stale_cutoff(lease: Duration) -> i64 {
    AegisDb::now_millis() - lease.as_millis() as i64
}

/// Decode one column, recording a defect instead of failing the row.
fn lenient<'r, T>(row: &'r SqliteRow, column: &str, defects: &mut Vec<String>) -> Option<T>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    match row.try_get::<Option<T>, _>(column) {
        Ok(value) => value,
        Err(e) => {
            defects.push(format!("{} could not be decoded: {}", column, e));
            None
        }
    }
}

/// Build a candidate from an incident row.
///
/// Only a row that cannot be identified (id, kind or status unreadable) is
/// an `Err`; every other bad column becomes a defect in `malformed`.
fn row_to_candidate(row: &SqliteRow) -> std::result::Result<Candidate, String> {
    let raw_id: Option<String> = row
        .try_get("id")
        .map_err(|e| format!("id could not be decoded: {}", e))?;
    let id = IncidentId::parse(raw_id.as_deref().unwrap_or_default()).map_err(|e| e.to_string())?;

    let kind_str: String = row
        .try_get("kind")
        .map_err(|e| format!("kind could not be decoded: {}", e))?;
    let kind = IncidentKind::parse(&kind_str)
        .ok_or_else(|| format!("Unknown incident kind: {}", kind_str))?;

    let status_str: String = row
        .try_get("status")
        .map_err(|e| format!("status could not be decoded: {}", e))?;
    let status = IncidentStatus::parse(&status_str)
        .ok_or_else(|| format!("Unknown incident status: {}", status_str))?;

    let mut defects = Vec::new();

    let dispatch_status = match lenient::<String>(row, "dispatch_status", &mut defects) {
        Some(raw) => match DispatchStatus::parse(&raw) {
            Some(parsed) => Some(parsed),
            None => {
                defects.push(format!("unknown dispatch status: {}", raw));
                None
            }
        },
        None => None,
    };

    let lat = lenient::<f64>(row, "lat", &mut defects);
    let lon = lenient::<f64>(row, "lon", &mut defects);
    let coordinates = match (lat, lon) {
        (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
        (None, None) => None,
        _ => {
            defects.push("only one of lat/lon is set".to_string());
            None
        }
    };

    let needs = match lenient::<String>(row, "needs", &mut defects) {
        Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(needs) => needs,
            Err(e) => {
                defects.push(format!("needs is not a JSON string array: {}", e));
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let manual_override = match lenient::<String>(row, "manual_override", &mut defects) {
        Some(raw) => match serde_json::from_str::<ManualOverride>(&raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                defects.push(format!("manual_override is not valid JSON: {}", e));
                None
            }
        },
        None => None,
    };

    let tag_confidence = lenient::<f64>(row, "hazard_confidence", &mut defects);
    let tag = lenient::<String>(row, "hazard_tag", &mut defects).map(|tag| HazardTag {
        tag,
        confidence: tag_confidence.unwrap_or(0.0),
    });

    let created_at = lenient::<i64>(row, "created_at", &mut defects)
        .map(AegisDb::millis_to_datetime)
        .unwrap_or_else(chrono::Utc::now);

    let incident = Incident {
        id,
        kind,
        coordinates,
        text: lenient(row, "text", &mut defects).unwrap_or_default(),
        tag,
        needs,
        need_type: lenient(row, "need_type", &mut defects),
        details: lenient(row, "details", &mut defects),
        severity: lenient(row, "severity", &mut defects),
        status,
        dispatch_status,
        manual_override,
        dispatch_round: lenient(row, "dispatch_round", &mut defects).unwrap_or(0),
        created_at,
    };

    Ok(Candidate {
        incident,
        observed_token: lenient(row, "claim_token", &mut defects),
        malformed: if defects.is_empty() {
            None
        } else {
            Some(defects.join("; "))
        },
    })
}
