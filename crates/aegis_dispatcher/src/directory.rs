//! Station Directory: TTL-bounded cache of active stations by category.
//!
//! Refresh is read-through: the first lookup after the TTL expires reloads
//! the registry synchronously. A failed reload keeps the previous snapshot.
//! Lookups never fail; with nothing to offer the configured depot is used.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aegis_db::{AegisDb, DbError};
use aegis_protocol::{Category, Coordinates, DirectoryConfig, Station, StationInfo};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::geo::haversine_m;

/// Read access to the station registry.
#[async_trait]
pub trait StationSource: Send + Sync {
    /// Active stations in registry order.
    async fn active_stations(&self) -> Result<Vec<Station>, DbError>;
}

#[async_trait]
impl StationSource for AegisDb {
    async fn active_stations(&self) -> Result<Vec<Station>, DbError> {
        self.list_active_stations().await
    }
}

/// How the returned station was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Direct,
    /// Substituted from the fallback chain of the requested category.
    Fallback { requested: Category },
    Depot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub station: StationInfo,
    pub kind: SelectionKind,
    /// Great-circle distance to the query point.
    pub distance_m: f64,
}

struct Snapshot {
    by_category: HashMap<Category, Vec<Station>>,
    loaded_at: Instant,
}

pub struct StationDirectory {
    source: Arc<dyn StationSource>,
    config: DirectoryConfig,
    snapshot: Option<Snapshot>,
    /// Set by `invalidate` and by failed refreshes so the next read retries.
    force_refresh: bool,
}

impl StationDirectory {
    pub fn new(source: Arc<dyn StationSource>, config: DirectoryConfig) -> Self {
        Self {
            source,
            config,
            snapshot: None,
            force_refresh: false,
        }
    }

    /// Force the next lookup to reload the registry.
    pub fn invalidate(&mut self) {
        self.force_refresh = true;
    }

    /// Nearest active station of `category`, walking the fallback chain and
    /// finally returning the depot.
    pub async fn nearest(&mut self, category: Category, point: Coordinates) -> Selection {
        self.refresh_if_stale().await;

        if let Some((station, distance_m)) = self.nearest_in(category, point) {
            return Selection {
                station: station_info(station),
                kind: SelectionKind::Direct,
                distance_m,
            };
        }

        for &substitute in self.config.chain_for(category) {
            if let Some((station, distance_m)) = self.nearest_in(substitute, point) {
                info!(
                    requested = %category,
                    substitute = %substitute,
                    station = %station.name,
                    "No active station for category, using fallback"
                );
                return Selection {
                    station: station_info(station),
                    kind: SelectionKind::Fallback { requested: category },
                    distance_m,
                };
            }
        }

        let depot = &self.config.depot;
        warn!(
            category = %category,
            depot = %depot.name,
            "No station in category or fallback chain, dispatching from depot"
        );
        Selection {
            station: StationInfo {
                category,
                name: depot.name.clone(),
                lat: depot.lat,
                lon: depot.lon,
            },
            kind: SelectionKind::Depot,
            distance_m: haversine_m(depot.coordinates(), point),
        }
    }

    /// Ties keep the earlier station in registry order.
    fn nearest_in(&self, category: Category, point: Coordinates) -> Option<(&Station, f64)> {
        let stations = self.snapshot.as_ref()?.by_category.get(&category)?;
        let mut best: Option<(&Station, f64)> = None;
        for station in stations {
            let distance = haversine_m(station.coordinates, point);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((station, distance)),
            }
        }
        best
    }

    fn is_stale(&self) -> bool {
        match &self.snapshot {
            None => true,
            Some(snapshot) => self.force_refresh || snapshot.loaded_at.elapsed() >= self.config.cache_ttl(),
        }
    }

    async fn refresh_if_stale(&mut self) {
        if !self.is_stale() {
            return;
        }

        match self.source.active_stations().await {
            Ok(stations) => {
                let count = stations.len();
                let mut by_category: HashMap<Category, Vec<Station>> = HashMap::new();
                for station in stations.into_iter().filter(|s| s.active) {
                    by_category.entry(station.category).or_default().push(station);
                }
                self.snapshot = Some(Snapshot {
                    by_category,
                    loaded_at: Instant::now(),
                });
                self.force_refresh = false;
                debug!(stations = count, "Station cache refreshed");
            }
            Err(e) => {
                // Old snapshot stays in service; retry on the next lookup.
                self.force_refresh = true;
                warn!(error = %e, stale = self.snapshot.is_some(), "Failed to refresh station cache");
            }
        }
    }

    /// Age of the current snapshot, if any.
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.snapshot.as_ref().map(|s| s.loaded_at.elapsed())
    }
}

fn station_info(station: &Station) -> StationInfo {
    StationInfo {
        category: station.category,
        name: station.name.clone(),
        lat: station.coordinates.lat,
        lon: station.coordinates.lon,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory registry that can be switched into a failing state.
    #[derive(Default)]
    struct FakeRegistry {
        stations: Mutex<Vec<Station>>,
        fail: AtomicBool,
        loads: AtomicUsize,
    }

    impl FakeRegistry {
        fn with(stations: Vec<Station>) -> Arc<Self> {
            Arc::new(Self {
                stations: Mutex::new(stations),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl StationSource for FakeRegistry {
        async fn active_stations(&self) -> Result<Vec<Station>, DbError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DbError::invalid_state("registry offline"));
            }
            Ok(self.stations.lock().unwrap().clone())
        }
    }

    fn station(name: &str, category: Category, lat: f64, lon: f64) -> Station {
        Station {
            name: name.to_string(),
            category,
            coordinates: Coordinates::new(lat, lon),
            active: true,
            external_id: None,
        }
    }

    fn pune_registry() -> Vec<Station> {
        vec![
            station("Police Station - Pimpri", Category::Police, 18.6073, 73.7654),
            station("Police Station - Chinchwad", Category::Police, 18.6400, 73.7945),
            station("Hospital - Wakad", Category::Hospital, 18.5135, 73.7604),
            station("Hospital - Hadapsar", Category::Hospital, 18.4852, 73.9047),
            station("Fire Station - Swargate", Category::Fire, 18.4549, 73.8563),
            station("Rescue Station - Shivajinagar", Category::Rescue, 18.5196, 73.8553),
        ]
    }

    fn point() -> Coordinates {
        Coordinates::new(18.50, 73.80)
    }

    #[tokio::test]
    async fn test_nearest_direct() {
        let mut directory = StationDirectory::new(FakeRegistry::with(pune_registry()), DirectoryConfig::default());

        let selection = directory.nearest(Category::Hospital, point()).await;
        assert_eq!(selection.station.name, "Hospital - Wakad");
        assert_eq!(selection.kind, SelectionKind::Direct);
        assert!(selection.distance_m > 0.0);
    }

    #[tokio::test]
    async fn test_fallback_chain() {
        let registry = vec![
            station("Hospital - Wakad", Category::Hospital, 18.5135, 73.7604),
            station("Fire Station - Swargate", Category::Fire, 18.4549, 73.8563),
        ];
        let mut directory = StationDirectory::new(FakeRegistry::with(registry), DirectoryConfig::default());

        // rescue -> [fire, hospital, police]: fire is first non-empty.
        let selection = directory.nearest(Category::Rescue, point()).await;
        assert_eq!(selection.station.name, "Fire Station - Swargate");
        assert_eq!(selection.station.category, Category::Fire);
        assert_eq!(
            selection.kind,
            SelectionKind::Fallback {
                requested: Category::Rescue
            }
        );
    }

    #[tokio::test]
    async fn test_depot_when_chain_is_empty() {
        let mut directory = StationDirectory::new(FakeRegistry::with(Vec::new()), DirectoryConfig::default());

        let selection = directory.nearest(Category::Police, point()).await;
        assert_eq!(selection.kind, SelectionKind::Depot);
        assert_eq!(selection.station.name, "Command Center - Pune");
        assert_eq!(selection.station.category, Category::Police);
    }

    #[tokio::test]
    async fn test_ties_use_registry_order() {
        let registry = vec![
            station("Fire - Kothrud A", Category::Fire, 18.51, 73.80),
            station("Fire - Kothrud B", Category::Fire, 18.51, 73.80),
        ];
        let mut directory = StationDirectory::new(FakeRegistry::with(registry), DirectoryConfig::default());

        let selection = directory.nearest(Category::Fire, point()).await;
        assert_eq!(selection.station.name, "Fire - Kothrud A");
    }

    #[tokio::test]
    async fn test_cache_respects_ttl_and_invalidate() {
        let registry = FakeRegistry::with(pune_registry());
        let mut directory = StationDirectory::new(registry.clone(), DirectoryConfig::default());

        directory.nearest(Category::Fire, point()).await;
        directory.nearest(Category::Police, point()).await;
        assert_eq!(registry.loads.load(Ordering::SeqCst), 1);

        registry
            .stations
            .lock()
            .unwrap()
            .push(station("Fire Station - Aundh", Category::Fire, 18.5003, 73.8005));
        // Still cached.
        let selection = directory.nearest(Category::Fire, point()).await;
        assert_eq!(selection.station.name, "Fire Station - Swargate");

        directory.invalidate();
        let selection = directory.nearest(Category::Fire, point()).await;
        assert_eq!(selection.station.name, "Fire Station - Aundh");
        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_reloads_every_lookup() {
        let registry = FakeRegistry::with(pune_registry());
        let config = DirectoryConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        let mut directory = StationDirectory::new(registry.clone(), config);

        directory.nearest(Category::Fire, point()).await;
        directory.nearest(Category::Fire, point()).await;
        assert_eq!(registry.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_snapshot() {
        let registry = FakeRegistry::with(pune_registry());
        let mut directory = StationDirectory::new(registry.clone(), DirectoryConfig::default());
        directory.nearest(Category::Fire, point()).await;

        registry.fail.store(true, Ordering::SeqCst);
        directory.invalidate();
        let selection = directory.nearest(Category::Fire, point()).await;
        assert_eq!(selection.station.name, "Fire Station - Swargate");
        assert_eq!(selection.kind, SelectionKind::Direct);
    }

    #[tokio::test]
    async fn test_failed_first_load_serves_depot() {
        let registry = FakeRegistry::with(pune_registry());
        registry.fail.store(true, Ordering::SeqCst);
        let mut directory = StationDirectory::new(registry.clone(), DirectoryConfig::default());

        let selection = directory.nearest(Category::Fire, point()).await;
        assert_eq!(selection.kind, SelectionKind::Depot);

        // Recovers on the next lookup.
        registry.fail.store(false, Ordering::SeqCst);
        let selection = directory.nearest(Category::Fire, point()).await;
        assert_eq!(selection.kind, SelectionKind::Direct);
    }

    #[tokio::test]
    async fn test_reads_from_store() {
        let db = AegisDb::open_memory().await.unwrap();
        for s in pune_registry() {
            db.upsert_station(&s).await.unwrap();
        }
        db.set_station_active("Fire Station - Swargate", false).await.unwrap();

        let mut directory = StationDirectory::new(Arc::new(db), DirectoryConfig::default());
        let selection = directory.nearest(Category::Fire, point()).await;
        assert_eq!(selection.station.name, "Rescue Station - Shivajinagar");
    }
}
