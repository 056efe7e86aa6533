//! Route Provider.
//!
//! Asks an external road-routing service for a path and degrades to a
//! straight line when the service times out, errors or has no route.
//! [`RouteProvider::route`] therefore never fails.

use std::sync::Arc;
use std::time::Duration;

use aegis_protocol::{Coordinates, Route, RoutingConfig, StationInfo};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geo::haversine_m;
use crate::metrics::{Metrics, METRICS};

/// Routing errors. Only ever seen by callers of [`RoutingService`]
/// directly; the provider absorbs them.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("routing service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("routing request timed out after {0:?}")]
    Timeout(Duration),

    #[error("no route: {0}")]
    NoRoute(String),

    #[error("malformed routing response: {0}")]
    Malformed(String),

    #[error("invalid routing input: {0}")]
    InvalidInput(String),
}

/// Path as reported by a road-routing backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadPath {
    pub geometry: Vec<Coordinates>,
    pub distance_m: f64,
    pub duration_s: f64,
}

/// External road-routing backend.
#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Path through `waypoints` in order (at least two).
    async fn route(&self, waypoints: &[Coordinates]) -> Result<RoadPath, RouteError>;
}

// ============================================================================
// OSRM backend
// ============================================================================

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// GeoJSON order: `[lon, lat]`.
    coordinates: Vec<[f64; 2]>,
}

/// OSRM-compatible HTTP routing client.
pub struct OsrmClient {
    http: reqwest::Client,
    base_url: String,
    profile: String,
}

impl OsrmClient {
    pub fn new(config: &RoutingConfig) -> Result<Self, RouteError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            profile: config.profile.clone(),
        })
    }

    /// `GET {base}/route/v1/{profile}/{lon,lat;lon,lat}`
    pub fn route_url(&self, waypoints: &[Coordinates]) -> String {
        let points = waypoints
            .iter()
            .map(|p| format!("{},{}", p.lon, p.lat))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=geojson",
            self.base_url, self.profile, points
        )
    }
}

#[async_trait]
impl RoutingService for OsrmClient {
    async fn route(&self, waypoints: &[Coordinates]) -> Result<RoadPath, RouteError> {
        if waypoints.len() < 2 {
            return Err(RouteError::InvalidInput(format!(
                "need at least 2 waypoints, got {}",
                waypoints.len()
            )));
        }

        let url = self.route_url(waypoints);
        debug!(url = %url, "Requesting road route");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // OSRM reports "NoRoute" and friends as JSON on 4xx, so try the body
        // before giving up on the status.
        match serde_json::from_str::<OsrmResponse>(&body) {
            Ok(parsed) => parse_osrm(parsed),
            Err(_) if !status.is_success() => Err(RouteError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            }),
            Err(e) => Err(RouteError::Malformed(e.to_string())),
        }
    }
}

fn parse_osrm(response: OsrmResponse) -> Result<RoadPath, RouteError> {
    if response.code != "Ok" {
        let detail = response.message.unwrap_or_default();
        return Err(RouteError::NoRoute(format!("{} {}", response.code, detail).trim().to_string()));
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| RouteError::NoRoute("response contained no routes".to_string()))?;

    Ok(RoadPath {
        geometry: route
            .geometry
            .coordinates
            .into_iter()
            .map(|[lon, lat]| Coordinates::new(lat, lon))
            .collect(),
        distance_m: route.distance,
        duration_s: route.duration,
    })
}

// ============================================================================
// Provider
// ============================================================================

/// Wraps a [`RoutingService`] with a timeout and the straight-line fallback.
pub struct RouteProvider {
    service: Option<Arc<dyn RoutingService>>,
    timeout: Duration,
    average_speed_mps: f64,
}

impl RouteProvider {
    pub fn new(service: Arc<dyn RoutingService>, config: &RoutingConfig) -> Self {
        Self {
            service: Some(service),
            timeout: config.timeout(),
            average_speed_mps: config.average_speed_mps(),
        }
    }

    /// Provider that always returns the synthetic route.
    pub fn offline(config: &RoutingConfig) -> Self {
        Self {
            service: None,
            timeout: config.timeout(),
            average_speed_mps: config.average_speed_mps(),
        }
    }

    /// Build from config: OSRM when enabled, offline otherwise.
    pub fn from_config(config: &RoutingConfig) -> Result<Self, RouteError> {
        if !config.enabled {
            return Ok(Self::offline(config));
        }
        let client = OsrmClient::new(config)?;
        Ok(Self::new(Arc::new(client), config))
    }

    /// Route from the dispatching station to `destination`.
    pub async fn route(&self, station: &StationInfo, destination: Coordinates) -> Route {
        let origin = station.coordinates();

        if let Some(service) = &self.service {
            let waypoints = [origin, destination];
            let call = service.route(&waypoints);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result.and_then(validate_path),
                Err(_) => Err(RouteError::Timeout(self.timeout)),
            };

            match result {
                Ok(path) => {
                    return Route {
                        geometry: path.geometry,
                        distance_m: path.distance_m,
                        duration_s: path.duration_s,
                        road_snapped: true,
                        station_category: station.category,
                        station_name: station.name.clone(),
                    };
                }
                Err(e) => {
                    Metrics::inc(&METRICS.route_fallbacks);
                    warn!(
                        station = %station.name,
                        error = %e,
                        "Routing service unavailable, using straight-line route"
                    );
                }
            }
        }

        self.straight_line(station, destination)
    }

    /// Two-point route with great-circle distance and estimated duration.
    pub fn straight_line(&self, station: &StationInfo, destination: Coordinates) -> Route {
        let origin = station.coordinates();
        let distance_m = haversine_m(origin, destination);
        Route {
            geometry: vec![origin, destination],
            distance_m,
            duration_s: distance_m / self.average_speed_mps,
            road_snapped: false,
            station_category: station.category,
            station_name: station.name.clone(),
        }
    }
}

fn validate_path(path: RoadPath) -> Result<RoadPath, RouteError> {
    if path.geometry.len() < 2 {
        return Err(RouteError::Malformed(format!(
            "geometry has {} point(s)",
            path.geometry.len()
        )));
    }
    if !(path.distance_m.is_finite() && path.distance_m >= 0.0) {
        return Err(RouteError::Malformed(format!("distance {}", path.distance_m)));
    }
    if !(path.duration_s.is_finite() && path.duration_s >= 0.0) {
        return Err(RouteError::Malformed(format!("duration {}", path.duration_s)));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_protocol::Category;

    struct FixedService(RoadPath);

    #[async_trait]
    impl RoutingService for FixedService {
        async fn route(&self, _waypoints: &[Coordinates]) -> Result<RoadPath, RouteError> {
            Ok(self.0.clone())
        }
    }

    struct SlowService;

    #[async_trait]
    impl RoutingService for SlowService {
        async fn route(&self, _waypoints: &[Coordinates]) -> Result<RoadPath, RouteError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(RouteError::NoRoute("unreachable".to_string()))
        }
    }

    struct FailingService;

    #[async_trait]
    impl RoutingService for FailingService {
        async fn route(&self, _waypoints: &[Coordinates]) -> Result<RoadPath, RouteError> {
            Err(RouteError::Status {
                status: 503,
                body: "upstream down".to_string(),
            })
        }
    }

    fn swargate() -> StationInfo {
        StationInfo {
            category: Category::Fire,
            name: "Fire Station - Swargate".to_string(),
            lat: 18.4549,
            lon: 73.8563,
        }
    }

    fn incident() -> Coordinates {
        Coordinates::new(18.50, 73.80)
    }

    fn config() -> RoutingConfig {
        RoutingConfig {
            timeout_secs: 1,
            ..Default::default()
        }
    }

    fn assert_straight_line(route: &Route, speed_mps: f64) {
        let expected = haversine_m(swargate().coordinates(), incident());
        assert!(!route.road_snapped);
        assert_eq!(route.geometry, vec![swargate().coordinates(), incident()]);
        assert!((route.distance_m - expected).abs() < 1e-6);
        assert!((route.duration_s - expected / speed_mps).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_road_route_is_used() {
        let path = RoadPath {
            geometry: vec![
                swargate().coordinates(),
                Coordinates::new(18.47, 73.83),
                incident(),
            ],
            distance_m: 9100.0,
            duration_s: 840.0,
        };
        let provider = RouteProvider::new(Arc::new(FixedService(path)), &config());

        let route = provider.route(&swargate(), incident()).await;
        assert!(route.road_snapped);
        assert_eq!(route.geometry.len(), 3);
        assert_eq!(route.distance_m, 9100.0);
        assert_eq!(route.station_name, "Fire Station - Swargate");
        assert_eq!(route.station_category, Category::Fire);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let config = config();
        let provider = RouteProvider::new(Arc::new(SlowService), &config);

        let route = provider.route(&swargate(), incident()).await;
        assert_straight_line(&route, config.average_speed_mps());
    }

    #[tokio::test]
    async fn test_service_error_falls_back() {
        let config = config();
        let provider = RouteProvider::new(Arc::new(FailingService), &config);

        let route = provider.route(&swargate(), incident()).await;
        assert_straight_line(&route, config.average_speed_mps());
    }

    #[tokio::test]
    async fn test_degenerate_geometry_falls_back() {
        let path = RoadPath {
            geometry: vec![incident()],
            distance_m: 10.0,
            duration_s: 1.0,
        };
        let config = config();
        let provider = RouteProvider::new(Arc::new(FixedService(path)), &config);

        let route = provider.route(&swargate(), incident()).await;
        assert_straight_line(&route, config.average_speed_mps());
    }

    #[tokio::test]
    async fn test_offline_provider() {
        let config = RoutingConfig {
            enabled: false,
            ..Default::default()
        };
        let provider = RouteProvider::from_config(&config).unwrap();
        let route = provider.route(&swargate(), incident()).await;
        assert_straight_line(&route, config.average_speed_mps());
        // 40 km/h
        assert!((config.average_speed_mps() - 11.111).abs() < 0.001);
    }

    #[test]
    fn test_osrm_url() {
        let client = OsrmClient::new(&RoutingConfig {
            base_url: "http://localhost:5000/".to_string(),
            ..Default::default()
        })
        .unwrap();
        let url = client.route_url(&[Coordinates::new(18.4549, 73.8563), Coordinates::new(18.5, 73.8)]);
        assert_eq!(
            url,
            "http://localhost:5000/route/v1/driving/73.8563,18.4549;73.8,18.5?overview=full&geometries=geojson"
        );
    }

    #[test]
    fn test_parse_osrm_ok() {
        let body = r#"{
            "code": "Ok",
            "routes": [{
                "distance": 9123.4,
                "duration": 812.5,
                "geometry": {"type": "LineString", "coordinates": [[73.8563, 18.4549], [73.83, 18.47], [73.8, 18.5]]}
            }],
            "waypoints": []
        }"#;
        let path = parse_osrm(serde_json::from_str(body).unwrap()).unwrap();
        assert_eq!(path.geometry[0], Coordinates::new(18.4549, 73.8563));
        assert_eq!(path.geometry.len(), 3);
        assert_eq!(path.distance_m, 9123.4);
    }

    #[test]
    fn test_parse_osrm_no_route() {
        let body = r#"{"code": "NoRoute", "message": "Impossible route between points"}"#;
        let err = parse_osrm(serde_json::from_str(body).unwrap()).unwrap_err();
        assert!(matches!(err, RouteError::NoRoute(ref msg) if msg.starts_with("NoRoute")));

        let body = r#"{"code": "Ok", "routes": []}"#;
        assert!(matches!(
            parse_osrm(serde_json::from_str(body).unwrap()),
            Err(RouteError::NoRoute(_))
        ));
    }
}
