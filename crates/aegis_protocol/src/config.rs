//! System configuration loaded from `aegis.toml`.
//!
//! Every section is optional; a missing file yields [`SystemConfig::default`].
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults;
use crate::types::{Category, Coordinates, TextSource};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Canonical configuration shared by the coordinator and CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub store: StoreConfig,
    pub coordinator: CoordinatorConfig,
    pub directory: DirectoryConfig,
    pub routing: RoutingConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file; `None` means `<aegis_home>/aegis.sqlite3`.
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub poll_interval_secs: u64,
    pub claim_lease_secs: u64,
    /// Stop after this many cycles; 0 runs until shutdown.
    pub max_cycles: u64,
    /// Reports must have `severity > min_severity` when set.
    pub min_severity: Option<i64>,
    /// Identity recorded on claims; defaults to `<hostname>-<pid>`.
    pub worker_id: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::DEFAULT_POLL_INTERVAL_SECS,
            claim_lease_secs: defaults::DEFAULT_CLAIM_LEASE_SECS,
            max_cycles: 0,
            min_severity: None,
            worker_id: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub cache_ttl_secs: u64,
    pub depot: DepotConfig,
    /// Substitute categories consulted in order when a category has no
    /// active station.
    pub fallback: Vec<FallbackRule>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: defaults::DEFAULT_STATION_CACHE_TTL_SECS,
            depot: DepotConfig::default(),
            fallback: default_fallback_chains(),
        }
    }
}

impl DirectoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Fallback chain for `category` (empty if none configured).
    pub fn chain_for(&self, category: Category) -> &[Category] {
        self.fallback
            .iter()
            .find(|rule| rule.category == category)
            .map(|rule| rule.then.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub category: Category,
    pub then: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            name: defaults::DEFAULT_DEPOT_NAME.to_string(),
            lat: defaults::DEFAULT_DEPOT_LAT,
            lon: defaults::DEFAULT_DEPOT_LON,
        }
    }
}

impl DepotConfig {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// When false every route is the synthetic straight line.
    pub enabled: bool,
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
    pub average_speed_kmh: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: defaults::DEFAULT_ROUTING_URL.to_string(),
            profile: defaults::DEFAULT_ROUTING_PROFILE.to_string(),
            timeout_secs: defaults::DEFAULT_ROUTING_TIMEOUT_SECS,
            average_speed_kmh: defaults::DEFAULT_AVERAGE_SPEED_KMH,
        }
    }
}

impl RoutingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn average_speed_mps(&self) -> f64 {
        self.average_speed_kmh * 1000.0 / 3600.0
    }
}

/// Keyword to category mapping; table order is priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub category: Category,
}

impl KeywordRule {
    pub fn new(keyword: &str, category: Category) -> Self {
        Self {
            keyword: keyword.to_string(),
            category,
        }
    }
}

/// How the classifier walks sources against the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// Each source is tried against every rule before the next source.
    #[default]
    SourceFirst,
    /// Each rule is tried against every source before the next rule, so
    /// the sources behave like one combined text.
    RuleFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub rules: Vec<KeywordRule>,
    /// Source order for field reports.
    pub report_sources: Vec<TextSource>,
    pub report_scan: ScanOrder,
    /// Source order for verified needs.
    pub need_sources: Vec<TextSource>,
    pub need_scan: ScanOrder,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: default_keyword_rules(),
            report_sources: vec![TextSource::Needs, TextSource::Text, TextSource::Tag],
            report_scan: ScanOrder::SourceFirst,
            need_sources: vec![TextSource::NeedType, TextSource::Text, TextSource::Details],
            need_scan: ScanOrder::RuleFirst,
        }
    }
}

/// Built-in rule table. Specific and urgent keywords come first so they
/// shadow the generic ones ("fire suppression" before "water").
pub fn default_keyword_rules() -> Vec<KeywordRule> {
    use Category::*;
    [
        ("fire suppression", Fire),
        ("fire", Fire),
        ("burning", Fire),
        ("smoke", Fire),
        ("blaze", Fire),
        ("medical", Hospital),
        ("health", Hospital),
        ("injury", Hospital),
        ("injured", Hospital),
        ("sick", Hospital),
        ("ambulance", Hospital),
        ("evacuation", Hospital),
        ("police", Police),
        ("security", Police),
        ("crime", Police),
        ("theft", Police),
        ("violence", Police),
        ("stampede", Police),
        ("law", Police),
        ("rescue", Rescue),
        ("trapped", Rescue),
        ("flood", Rescue),
        ("earthquake", Rescue),
        ("collapse", Rescue),
        ("water", Rescue),
        ("food", Rescue),
        ("disaster", Rescue),
        ("other", Rescue),
    ]
    .into_iter()
    .map(|(keyword, category)| KeywordRule::new(keyword, category))
    .collect()
}

pub fn default_fallback_chains() -> Vec<FallbackRule> {
    use Category::*;
    vec![
        FallbackRule { category: Police, then: vec![Rescue] },
        FallbackRule { category: Hospital, then: vec![Rescue] },
        FallbackRule { category: Fire, then: vec![Rescue] },
        FallbackRule { category: Rescue, then: vec![Fire, Hospital, Police] },
    ]
}

impl SystemConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.coordinator.claim_lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.claim_lease_secs must be at least 1".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "store.max_connections must be at least 1".to_string(),
            ));
        }
        if !(self.routing.average_speed_kmh.is_finite() && self.routing.average_speed_kmh > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "routing.average_speed_kmh must be positive, got {}",
                self.routing.average_speed_kmh
            )));
        }
        if self.routing.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "routing.timeout_secs must be at least 1".to_string(),
            ));
        }
        self.directory
            .depot
            .coordinates()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("directory.depot: {}", e)))?;
        if let Some(rule) = self
            .classifier
            .rules
            .iter()
            .find(|rule| rule.keyword.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "classifier rule for {} has an empty keyword",
                rule.category
            )));
        }
        if self.classifier.report_sources.is_empty() || self.classifier.need_sources.is_empty() {
            return Err(ConfigError::Invalid(
                "classifier source order must name at least one source".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SystemConfig::default();
        config.validate().unwrap();
        assert_eq!(config.coordinator.poll_interval(), Duration::from_secs(5));
        assert_eq!(
            config.directory.chain_for(Category::Rescue),
            &[Category::Fire, Category::Hospital, Category::Police]
        );
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = SystemConfig::from_toml_str(
            r#"
            [coordinator]
            poll_interval_secs = 2

            [routing]
            enabled = false

            [classifier]
            report_sources = ["tag", "text"]
            "#,
        )
        .unwrap();

        assert_eq!(config.coordinator.poll_interval_secs, 2);
        assert!(!config.routing.enabled);
        assert_eq!(config.routing.timeout_secs, defaults::DEFAULT_ROUTING_TIMEOUT_SECS);
        assert_eq!(
            config.classifier.report_sources,
            vec![TextSource::Tag, TextSource::Text]
        );
        assert_eq!(config.classifier.rules, default_keyword_rules());
        assert_eq!(config.classifier.report_scan, ScanOrder::SourceFirst);
        assert_eq!(config.classifier.need_scan, ScanOrder::RuleFirst);
    }

    #[test]
    fn test_scan_order_from_toml() {
        let config = SystemConfig::from_toml_str(
            "[classifier]\nreport_scan = \"rule_first\"\nneed_scan = \"source_first\"\n",
        )
        .unwrap();
        assert_eq!(config.classifier.report_scan, ScanOrder::RuleFirst);
        assert_eq!(config.classifier.need_scan, ScanOrder::SourceFirst);
    }

    #[test]
    fn test_custom_rules_and_fallbacks() {
        let config = SystemConfig::from_toml_str(
            r#"
            [[classifier.rules]]
            keyword = "gas leak"
            category = "fire"

            [[directory.fallback]]
            category = "hospital"
            then = ["rescue", "fire"]
            "#,
        )
        .unwrap();

        assert_eq!(config.classifier.rules, vec![KeywordRule::new("gas leak", Category::Fire)]);
        assert_eq!(
            config.directory.chain_for(Category::Hospital),
            &[Category::Rescue, Category::Fire]
        );
        assert!(config.directory.chain_for(Category::Police).is_empty());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = SystemConfig::from_toml_str("[coordinator]\npoll_interval_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_category() {
        let err = SystemConfig::from_toml_str(
            "[[classifier.rules]]\nkeyword = \"x\"\ncategory = \"navy\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_is_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SystemConfig::load(tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, SystemConfig::default());
    }
}
