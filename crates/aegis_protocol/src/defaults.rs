//! Canonical default values shared by the coordinator, store and CLI.

/// Seconds between coordinator cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Station cache staleness window.
pub const DEFAULT_STATION_CACHE_TTL_SECS: u64 = 60;
/// A `Processing` claim older than this is considered abandoned.
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 300;

pub const DEFAULT_DATABASE_FILE: &str = "aegis.sqlite3";
pub const DEFAULT_CONFIG_FILE: &str = "aegis.toml";

pub const DEFAULT_ROUTING_URL: &str = "http://router.project-osrm.org";
pub const DEFAULT_ROUTING_PROFILE: &str = "driving";
pub const DEFAULT_ROUTING_TIMEOUT_SECS: u64 = 10;
/// Speed used to estimate duration of a synthetic straight-line route.
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 40.0;

/// Command center used when no station of any acceptable category exists.
pub const DEFAULT_DEPOT_NAME: &str = "Command Center - Pune";
pub const DEFAULT_DEPOT_LAT: f64 = 18.521;
pub const DEFAULT_DEPOT_LON: f64 = 73.854;

pub const MISSION_STATUS_ACTIVE: &str = "Active";
