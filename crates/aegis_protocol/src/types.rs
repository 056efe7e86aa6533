//! Domain types for incidents, stations, routes and missions.
//!
//! These types are the single source of truth shared by the store, the
//! coordinator and the CLI.

use aegis_ids::{IncidentId, MissionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Category
// ============================================================================

/// Responder type. Closed set: anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Police,
    Hospital,
    Fire,
    Rescue,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Police,
        Category::Hospital,
        Category::Fire,
        Category::Rescue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Police => "police",
            Self::Hospital => "hospital",
            Self::Fire => "fire",
            Self::Rescue => "rescue",
        }
    }

    /// Case-insensitive parse, surrounding whitespace ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "police" => Some(Self::Police),
            "hospital" => Some(Self::Hospital),
            "fire" => Some(Self::Fire),
            "rescue" => Some(Self::Rescue),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown category '{}'", s))
    }
}

// ============================================================================
// Coordinates
// ============================================================================

/// WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Reject NaN/infinite values and out-of-range degrees.
    pub fn validate(&self) -> Result<(), String> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(format!("non-finite coordinates ({}, {})", self.lat, self.lon));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("latitude {} out of range", self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(format!("longitude {} out of range", self.lon));
        }
        Ok(())
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lon)
    }
}

// ============================================================================
// Incident
// ============================================================================

/// Which intake pipeline produced the work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentKind {
    /// Field report analysed by the upstream classifier.
    Report,
    /// Volunteer-verified need.
    Need,
}

impl IncidentKind {
    pub const ALL: [IncidentKind; 2] = [IncidentKind::Report, IncidentKind::Need];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Need => "need",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "report" => Some(Self::Report),
            "need" => Some(Self::Need),
            _ => None,
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Analysis lifecycle, owned by intake except for `InProgress` and `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    Pending,
    Analyzed,
    AnalyzedFull,
    Verified,
    InProgress,
    Error,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Analyzed => "Analyzed",
            Self::AnalyzedFull => "Analyzed_Full",
            Self::Verified => "Verified",
            Self::InProgress => "InProgress",
            Self::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Analyzed" => Some(Self::Analyzed),
            "Analyzed_Full" => Some(Self::AnalyzedFull),
            "Verified" => Some(Self::Verified),
            "InProgress" => Some(Self::InProgress),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Statuses that make an item of `kind` eligible for dispatch.
    pub fn dispatchable(kind: IncidentKind) -> &'static [IncidentStatus] {
        match kind {
            IncidentKind::Report => &[IncidentStatus::Analyzed, IncidentStatus::AnalyzedFull],
            IncidentKind::Need => &[IncidentStatus::Verified],
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch lifecycle, written only by the coordinator and the reroute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchStatus {
    Unassigned,
    /// Human re-route requested; picked up again automatically.
    Pending,
    /// Claimed by a coordinator, mission not yet written.
    Processing,
    Assigned,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unassigned => "Unassigned",
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Assigned => "Assigned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Unassigned" => Some(Self::Unassigned),
            "Pending" => Some(Self::Pending),
            "Processing" => Some(Self::Processing),
            "Assigned" => Some(Self::Assigned),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Label and confidence attached by the upstream image classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardTag {
    pub tag: String,
    pub confidence: f64,
}

/// Human re-route instruction.
///
/// Kept loosely typed because it is written by an external UI; the
/// coordinator validates it when it acts on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl ManualOverride {
    /// Override category, `Ok(None)` when absent or blank.
    pub fn category(&self) -> Result<Option<Category>, String> {
        match self.category.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Category::parse(raw)
                .map(Some)
                .ok_or_else(|| format!("override names unknown category '{}'", raw)),
        }
    }

    /// Explicit station coordinates, if both are present.
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }
}

/// Named text field of an incident consulted by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Needs inferred by the upstream analysis.
    Needs,
    /// Free text of the report or raw message of the need.
    Text,
    /// Hazard label from the image classifier.
    Tag,
    /// Triage need type of a verified need.
    NeedType,
    /// Triage details of a verified need.
    Details,
}

impl TextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Needs => "needs",
            Self::Text => "text",
            Self::Tag => "tag",
            Self::NeedType => "need_type",
            Self::Details => "details",
        }
    }
}

impl fmt::Display for TextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A report or verified need awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub kind: IncidentKind,
    pub coordinates: Option<Coordinates>,
    /// Report text or the raw message of a need.
    pub text: String,
    pub tag: Option<HazardTag>,
    pub needs: Vec<String>,
    pub need_type: Option<String>,
    pub details: Option<String>,
    pub severity: Option<i64>,
    pub status: IncidentStatus,
    pub dispatch_status: Option<DispatchStatus>,
    pub manual_override: Option<ManualOverride>,
    /// Incremented by every human re-route; part of the mission dedupe key.
    pub dispatch_round: i64,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Analysed field report as intake would record it.
    pub fn new_report(coordinates: Option<Coordinates>, text: impl Into<String>) -> Self {
        Self {
            id: IncidentId::generate(),
            kind: IncidentKind::Report,
            coordinates,
            text: text.into(),
            tag: None,
            needs: Vec::new(),
            need_type: None,
            details: None,
            severity: None,
            status: IncidentStatus::Analyzed,
            dispatch_status: Some(DispatchStatus::Unassigned),
            manual_override: None,
            dispatch_round: 0,
            created_at: Utc::now(),
        }
    }

    /// Volunteer-verified need as intake would record it.
    pub fn new_need(
        coordinates: Option<Coordinates>,
        raw_message: impl Into<String>,
        need_type: Option<String>,
    ) -> Self {
        Self {
            kind: IncidentKind::Need,
            need_type,
            status: IncidentStatus::Verified,
            ..Self::new_report(coordinates, raw_message)
        }
    }

    pub fn with_tag(mut self, tag: &str, confidence: f64) -> Self {
        self.tag = Some(HazardTag {
            tag: tag.to_string(),
            confidence,
        });
        self
    }

    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = needs.into_iter().map(Into::into).collect();
        self
    }

    /// Text values for one classifier source, in field order.
    pub fn text_for(&self, source: TextSource) -> Vec<&str> {
        match source {
            TextSource::Needs => self.needs.iter().map(String::as_str).collect(),
            TextSource::Text => vec![self.text.as_str()],
            TextSource::Tag => self.tag.iter().map(|t| t.tag.as_str()).collect(),
            TextSource::NeedType => self.need_type.iter().map(String::as_str).collect(),
            TextSource::Details => self.details.iter().map(String::as_str).collect(),
        }
    }
}

// ============================================================================
// Station
// ============================================================================

/// Registered responder resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub category: Category,
    pub coordinates: Coordinates,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Station snapshot recorded on missions and assigned incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    #[serde(rename = "type")]
    pub category: Category,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl StationInfo {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }
}

// ============================================================================
// Route & Mission
// ============================================================================

/// Path from the dispatching station to the incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Ordered points, at least origin and destination.
    pub geometry: Vec<Coordinates>,
    pub distance_m: f64,
    pub duration_s: f64,
    /// False for the synthetic straight line used when routing is unavailable.
    pub road_snapped: bool,
    pub station_category: Category,
    pub station_name: String,
}

/// Immutable dispatch decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub source_kind: IncidentKind,
    pub source_ids: Vec<IncidentId>,
    pub routes: Vec<Route>,
    pub station: StationInfo,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!(Category::parse(" FIRE "), Some(Category::Fire));
        assert_eq!(Category::parse("Hospital"), Some(Category::Hospital));
        assert_eq!(Category::parse("ambulance"), None);
    }

    #[test]
    fn test_coordinates_validate() {
        assert!(Coordinates::new(18.5, 73.8).validate().is_ok());
        assert!(Coordinates::new(91.0, 0.0).validate().is_err());
        assert!(Coordinates::new(0.0, -181.0).validate().is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn test_override_category() {
        let blank = ManualOverride {
            category: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.category(), Ok(None));

        let police = ManualOverride {
            category: Some("Police".to_string()),
            ..Default::default()
        };
        assert_eq!(police.category(), Ok(Some(Category::Police)));

        let bogus = ManualOverride {
            category: Some("navy".to_string()),
            ..Default::default()
        };
        assert!(bogus.category().is_err());
    }

    #[test]
    fn test_override_json_uses_type_key() {
        let json = r#"{"type":"fire","name":"Fire Station - Swargate","lat":18.45,"lon":73.85}"#;
        let parsed: ManualOverride = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.category.as_deref(), Some("fire"));
        assert_eq!(parsed.coordinates(), Some(Coordinates::new(18.45, 73.85)));
    }

    #[test]
    fn test_status_round_trip_names() {
        assert_eq!(
            IncidentStatus::parse(IncidentStatus::AnalyzedFull.as_str()),
            Some(IncidentStatus::AnalyzedFull)
        );
        assert_eq!(DispatchStatus::parse("Assigned"), Some(DispatchStatus::Assigned));
        assert_eq!(DispatchStatus::parse("assigned"), None);
    }
}
