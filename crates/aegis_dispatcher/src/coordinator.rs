//! Dispatch Coordinator.
//!
//! Each cycle walks the eligible reports and needs once. Every item is
//! claimed with a compare-and-set before any outbound I/O, then classified,
//! matched to a station, routed and persisted together with its status
//! flip. Failures stay inside the item:
//!
//! - malformed data marks the incident `Error` and it is never polled again
//! - missing input releases the claim so the next cycle retries it
//! - a store error on one item releases it; only a dead store aborts the cycle
//!
//! A coordinator that dies mid-item leaves a `Processing` row behind; once
//! its lease expires another coordinator takes it over.

use std::sync::Arc;
use std::time::Instant;

use aegis_db::{AegisDb, Candidate, Claim, DbError, EligibilityFilter, PersistOutcome};
use aegis_protocol::defaults::MISSION_STATUS_ACTIVE;
use aegis_protocol::{
    Category, Coordinates, CoordinatorConfig, IncidentKind, ManualOverride, Mission, MissionId, StationInfo,
    SystemConfig,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classification, Classifier};
use crate::directory::{SelectionKind, StationDirectory};
use crate::metrics::{Metrics, METRICS};
use crate::routing::{RouteError, RouteProvider};

/// Per-item failure classes.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Data that will never dispatch; the incident is marked `Error`.
    #[error("malformed incident: {0}")]
    Permanent(String),

    /// Input missing for now; the claim is released for a later cycle.
    #[error("skipped: {0}")]
    Skip(String),

    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// Only raised while building a coordinator.
    #[error("routing setup failed: {0}")]
    Routing(#[from] RouteError),
}

/// Counts for one cycle, across both incident kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub eligible: usize,
    pub claimed: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errored: usize,
    pub claim_lost: usize,
}

/// Totals returned by [`Coordinator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub dispatched: usize,
}

pub struct Coordinator {
    db: AegisDb,
    classifier: Classifier,
    directory: StationDirectory,
    routes: RouteProvider,
    config: CoordinatorConfig,
    worker_id: String,
}

impl Coordinator {
    /// Wire a coordinator from configuration, reading stations from `db`.
    pub fn new(db: AegisDb, config: &SystemConfig) -> Result<Self, DispatchError> {
        let routes = RouteProvider::from_config(&config.routing)?;
        let directory = StationDirectory::new(Arc::new(db.clone()), config.directory.clone());
        let classifier = Classifier::new(&config.classifier);
        Ok(Self::with_parts(
            db,
            classifier,
            directory,
            routes,
            config.coordinator.clone(),
        ))
    }

    /// Assemble from explicit components (tests, embedding).
    pub fn with_parts(
        db: AegisDb,
        classifier: Classifier,
        directory: StationDirectory,
        routes: RouteProvider,
        config: CoordinatorConfig,
    ) -> Self {
        let worker_id = config.worker_id.clone().unwrap_or_else(default_worker_id);
        Self {
            db,
            classifier,
            directory,
            routes,
            config,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run cycles until `shutdown` fires or `max_cycles` is reached.
    ///
    /// A failed cycle is logged and retried after the normal interval.
    /// Dropping every sender of `shutdown` also stops the loop.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> RunSummary {
        let interval = self.config.poll_interval();
        let max_cycles = self.config.max_cycles;
        let mut summary = RunSummary::default();

        info!(
            worker_id = %self.worker_id,
            interval_secs = interval.as_secs(),
            max_cycles,
            "Coordinator started"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => summary.dispatched += report.dispatched,
                Err(e) => {
                    summary.failed_cycles += 1;
                    error!(error = %e, "Dispatch cycle aborted, retrying next interval");
                }
            }
            summary.cycles += 1;

            if max_cycles > 0 && summary.cycles >= max_cycles {
                info!(cycles = summary.cycles, "Reached max cycles");
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(
            cycles = summary.cycles,
            failed_cycles = summary.failed_cycles,
            dispatched = summary.dispatched,
            "Coordinator stopped"
        );
        summary
    }

    /// Process every currently eligible item once.
    ///
    /// Errors only when the store is unreachable.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, DbError> {
        let start = Instant::now();
        let result = self.cycle_inner().await;
        METRICS.record_cycle_time(start);

        match &result {
            Ok(report) => {
                Metrics::inc(&METRICS.cycles_completed);
                if report.eligible > 0 {
                    info!(
                        eligible = report.eligible,
                        claimed = report.claimed,
                        dispatched = report.dispatched,
                        skipped = report.skipped,
                        failed = report.failed,
                        errored = report.errored,
                        claim_lost = report.claim_lost,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Dispatch cycle complete"
                    );
                } else {
                    debug!("Dispatch cycle found no eligible items");
                }
            }
            Err(_) => Metrics::inc(&METRICS.cycles_failed),
        }
        result
    }

    async fn cycle_inner(&mut self) -> Result<CycleReport, DbError> {
        self.db.ping().await?;

        let filter = EligibilityFilter {
            min_severity: self.config.min_severity,
            claim_lease: self.config.claim_lease(),
            limit: None,
        };
        let mut report = CycleReport::default();

        for kind in IncidentKind::ALL {
            let candidates = self.db.find_eligible(kind, &filter).await?;
            report.eligible += candidates.len();

            for candidate in &candidates {
                self.process(candidate, &mut report).await?;
            }
        }

        Ok(report)
    }

    /// Claim and dispatch one item. Returns `Err` only for a dead store.
    async fn process(&mut self, candidate: &Candidate, report: &mut CycleReport) -> Result<(), DbError> {
        let incident_id = &candidate.incident.id;

        let claim = match self
            .db
            .claim(candidate, &self.worker_id, self.config.claim_lease())
            .await?
        {
            Some(claim) => claim,
            None => {
                report.claim_lost += 1;
                Metrics::inc(&METRICS.claims_lost);
                return Ok(());
            }
        };
        report.claimed += 1;

        match self.dispatch(candidate, &claim).await {
            Ok(PersistOutcome::Persisted(mission_id)) => {
                report.dispatched += 1;
                Metrics::inc(&METRICS.missions_created);
                debug!(incident_id = %incident_id, mission_id = %mission_id, "Incident dispatched");
            }
            Ok(PersistOutcome::AlreadyDispatched(mission_id)) => {
                report.dispatched += 1;
                Metrics::inc(&METRICS.missions_deduplicated);
                info!(incident_id = %incident_id, mission_id = %mission_id, "Incident already had a mission");
            }
            Ok(PersistOutcome::ClaimLost) => {
                report.claim_lost += 1;
                Metrics::inc(&METRICS.claims_lost);
            }
            Err(DispatchError::Permanent(message)) => {
                report.errored += 1;
                Metrics::inc(&METRICS.permanent_errors);
                warn!(incident_id = %incident_id, error = %message, "Marking incident as Error");
                self.db.mark_error(&claim, &message).await?;
            }
            Err(DispatchError::Skip(message)) => {
                report.skipped += 1;
                Metrics::inc(&METRICS.items_skipped);
                info!(incident_id = %incident_id, reason = %message, "Incident skipped, will retry");
                self.db.release_claim(&claim).await?;
            }
            Err(e @ (DispatchError::Store(_) | DispatchError::Routing(_))) => {
                report.failed += 1;
                Metrics::inc(&METRICS.items_failed);
                error!(incident_id = %incident_id, error = %e, "Failed to dispatch incident");

                // A dead store ends the cycle; the claim then waits out its lease.
                self.db.ping().await?;
                self.db.release_claim(&claim).await?;
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, candidate: &Candidate, claim: &Claim) -> Result<PersistOutcome, DispatchError> {
        let incident = &candidate.incident;

        if let Some(defect) = &candidate.malformed {
            return Err(DispatchError::Permanent(defect.clone()));
        }

        let override_category = match &incident.manual_override {
            Some(manual) => manual.category().map_err(DispatchError::Permanent)?,
            None => None,
        };

        let point = incident
            .coordinates
            .ok_or_else(|| DispatchError::Skip("incident has no coordinates".to_string()))?;
        point.validate().map_err(DispatchError::Permanent)?;

        let classification = self.classifier.classify_incident(incident, override_category);
        debug!(
            incident_id = %incident.id,
            category = %classification.category,
            reason = ?classification.reason,
            "Incident classified"
        );

        let station = match incident.manual_override.as_ref() {
            Some(manual) if manual.lat.is_some() || manual.lon.is_some() => {
                override_station(manual, &classification)?
            }
            _ => self.select_station(classification.category, point).await,
        };

        let route = self.routes.route(&station, point).await;

        let mission = Mission {
            id: MissionId::new(),
            source_kind: incident.kind,
            source_ids: vec![incident.id.clone()],
            routes: vec![route],
            station,
            status: MISSION_STATUS_ACTIVE.to_string(),
            created_at: Utc::now(),
        };

        let outcome = self
            .db
            .persist_mission(&mission, std::slice::from_ref(claim))
            .await?;
        Ok(outcome)
    }

    async fn select_station(&mut self, category: Category, point: Coordinates) -> StationInfo {
        let selection = self.directory.nearest(category, point).await;
        match selection.kind {
            SelectionKind::Direct => {}
            SelectionKind::Fallback { .. } => Metrics::inc(&METRICS.station_fallbacks),
            SelectionKind::Depot => Metrics::inc(&METRICS.depot_dispatches),
        }
        selection.station
    }
}

/// Station given explicitly by a human re-route; bypasses the directory.
fn override_station(
    manual: &ManualOverride,
    classification: &Classification,
) -> Result<StationInfo, DispatchError> {
    let coordinates = manual.coordinates().ok_or_else(|| {
        DispatchError::Permanent("override has only one of lat/lon".to_string())
    })?;
    coordinates
        .validate()
        .map_err(|e| DispatchError::Permanent(format!("override station: {}", e)))?;

    let name = manual
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("Manual Override")
        .to_string();

    Ok(StationInfo {
        category: classification.category,
        name,
        lat: coordinates.lat,
        lon: coordinates.lon,
    })
}

/// `<hostname>-<pid>`, recorded on every claim.
pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "aegis".to_string());
    format!("{}-{}", host, std::process::id())
}
