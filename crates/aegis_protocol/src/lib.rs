//! Shared vocabulary for the Aegis dispatch service: domain types,
//! canonical defaults and the TOML configuration.

pub mod config;
pub mod defaults;
pub mod types;

pub use aegis_ids::{ClaimToken, IdParseError, IncidentId, MissionId};
pub use config::{
    ClassifierConfig, ConfigError, CoordinatorConfig, DepotConfig, DirectoryConfig, FallbackRule,
    KeywordRule, RoutingConfig, ScanOrder, StoreConfig, SystemConfig,
};
pub use types::{
    Category, Coordinates, DispatchStatus, HazardTag, Incident, IncidentKind, IncidentStatus,
    ManualOverride, Mission, Route, Station, StationInfo, TextSource,
};
