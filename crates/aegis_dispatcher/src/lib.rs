//! Aegis dispatch pipeline.
//!
//! Claim, classify, locate a station, route, persist. The
//! [`Coordinator`] drives the loop; the other modules are the leaves it
//! delegates to and are usable on their own.

pub mod classifier;
pub mod coordinator;
pub mod directory;
pub mod geo;
pub mod metrics;
pub mod routing;
pub mod tour;

pub use classifier::{Classification, ClassificationReason, Classifier};
pub use coordinator::{default_worker_id, Coordinator, CycleReport, DispatchError, RunSummary};
pub use directory::{Selection, SelectionKind, StationDirectory, StationSource};
pub use geo::haversine_m;
pub use metrics::{MetricsSnapshot, METRICS};
pub use routing::{OsrmClient, RoadPath, RouteError, RouteProvider, RoutingService};
pub use tour::{plan_tours, Tour};
