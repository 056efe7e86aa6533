//! Responder category classification.
//!
//! Priority-ordered rule engine: an explicit override wins, otherwise the
//! configured text sources are matched against the rule table. Reports scan
//! source by source; needs scan rule by rule across all their text, so a
//! more urgent keyword anywhere in a need beats its declared type. The first
//! case-insensitive substring hit wins. No hit anywhere yields `rescue`.

use aegis_protocol::{Category, ClassifierConfig, Incident, IncidentKind, ScanOrder, TextSource};
use serde::Serialize;

/// Category returned when nothing matches.
pub const DEFAULT_CATEGORY: Category = Category::Rescue;

/// Why a category was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ClassificationReason {
    Override,
    Matched { source: TextSource, keyword: String },
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: Category,
    pub reason: ClassificationReason,
}

/// Compiled rule table plus per-kind source order.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Keywords lowercased once at construction.
    rules: Vec<(String, Category)>,
    report_sources: Vec<TextSource>,
    report_scan: ScanOrder,
    need_sources: Vec<TextSource>,
    need_scan: ScanOrder,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| (rule.keyword.trim().to_lowercase(), rule.category))
            .filter(|(keyword, _)| !keyword.is_empty())
            .collect();

        Self {
            rules,
            report_sources: config.report_sources.clone(),
            report_scan: config.report_scan,
            need_sources: config.need_sources.clone(),
            need_scan: config.need_scan,
        }
    }

    pub fn sources_for(&self, kind: IncidentKind) -> &[TextSource] {
        match kind {
            IncidentKind::Report => &self.report_sources,
            IncidentKind::Need => &self.need_sources,
        }
    }

    pub fn scan_for(&self, kind: IncidentKind) -> ScanOrder {
        match kind {
            IncidentKind::Report => self.report_scan,
            IncidentKind::Need => self.need_scan,
        }
    }

    /// Classify an incident using the source order configured for its kind.
    ///
    /// `override_category` is the already validated override, if any.
    pub fn classify_incident(
        &self,
        incident: &Incident,
        override_category: Option<Category>,
    ) -> Classification {
        let sources: Vec<(TextSource, Vec<&str>)> = self
            .sources_for(incident.kind)
            .iter()
            .map(|&source| (source, incident.text_for(source)))
            .collect();
        self.classify(override_category, &sources, self.scan_for(incident.kind))
    }

    /// Deterministic and total: always returns one of the four categories.
    pub fn classify(
        &self,
        override_category: Option<Category>,
        sources: &[(TextSource, Vec<&str>)],
        scan: ScanOrder,
    ) -> Classification {
        if let Some(category) = override_category {
            return Classification {
                category,
                reason: ClassificationReason::Override,
            };
        }

        let haystacks: Vec<(TextSource, String)> = sources
            .iter()
            .flat_map(|(source, texts)| texts.iter().map(move |text| (*source, text.to_lowercase())))
            .filter(|(_, text)| !text.trim().is_empty())
            .collect();

        let hit = match scan {
            ScanOrder::SourceFirst => haystacks.iter().find_map(|(source, text)| {
                self.rules
                    .iter()
                    .find(|(keyword, _)| text.contains(keyword.as_str()))
                    .map(|rule| (*source, rule))
            }),
            ScanOrder::RuleFirst => self.rules.iter().find_map(|rule| {
                haystacks
                    .iter()
                    .find(|(_, text)| text.contains(rule.0.as_str()))
                    .map(|(source, _)| (*source, rule))
            }),
        };

        match hit {
            Some((source, (keyword, category))) => Classification {
                category: *category,
                reason: ClassificationReason::Matched {
                    source,
                    keyword: keyword.clone(),
                },
            },
            None => Classification {
                category: DEFAULT_CATEGORY,
                reason: ClassificationReason::Default,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_protocol::{Coordinates, KeywordRule};

    fn report(text: &str) -> Incident {
        Incident::new_report(Some(Coordinates::new(18.50, 73.80)), text)
    }

    #[test]
    fn test_override_wins() {
        let classifier = Classifier::default();
        let result = classifier.classify_incident(&report("building on fire"), Some(Category::Police));
        assert_eq!(result.category, Category::Police);
        assert_eq!(result.reason, ClassificationReason::Override);
    }

    #[test]
    fn test_case_insensitive_substring() {
        let classifier = Classifier::default();
        let result = classifier.classify_incident(&report("Thick SMOKE from the warehouse"), None);
        assert_eq!(result.category, Category::Fire);
        assert_eq!(
            result.reason,
            ClassificationReason::Matched {
                source: TextSource::Text,
                keyword: "smoke".to_string(),
            }
        );
    }

    #[test]
    fn test_no_match_defaults_to_rescue() {
        let classifier = Classifier::default();
        let result = classifier.classify_incident(&report("please send someone"), None);
        assert_eq!(result.category, Category::Rescue);
        assert_eq!(result.reason, ClassificationReason::Default);
    }

    #[test]
    fn test_fire_suppression_shadows_water() {
        let classifier = Classifier::default();
        let incident = report("").with_needs(["water for fire suppression"]);
        assert_eq!(classifier.classify_incident(&incident, None).category, Category::Fire);
    }

    #[test]
    fn test_needs_before_text_for_reports() {
        let classifier = Classifier::default();
        let incident = report("crowd turned violent").with_needs(["medical"]);
        assert_eq!(classifier.classify_incident(&incident, None).category, Category::Hospital);
    }

    #[test]
    fn test_stampede_and_medical_in_text() {
        let classifier = Classifier::default();
        let incident = report("stampede near the temple, medical help needed");
        // "medical" precedes "stampede" in the rule table.
        assert_eq!(classifier.classify_incident(&incident, None).category, Category::Hospital);
    }

    #[test]
    fn test_stampede_tag_follows_source_order() {
        let incident = report("several people need medical attention").with_tag("stampede", 0.91);

        let default_order = Classifier::default();
        assert_eq!(default_order.classify_incident(&incident, None).category, Category::Hospital);

        let tag_first = Classifier::new(&ClassifierConfig {
            report_sources: vec![TextSource::Tag, TextSource::Text],
            ..Default::default()
        });
        let result = tag_first.classify_incident(&incident, None);
        assert_eq!(result.category, Category::Police);
        assert_eq!(
            result.reason,
            ClassificationReason::Matched {
                source: TextSource::Tag,
                keyword: "stampede".to_string(),
            }
        );
    }

    fn need(text: &str, need_type: &str) -> Incident {
        Incident::new_need(Some(Coordinates::new(18.50, 73.80)), text, Some(need_type.to_string()))
    }

    #[test]
    fn test_urgent_keyword_in_need_text_beats_need_type() {
        let classifier = Classifier::default();
        let result = classifier.classify_incident(&need("my neighbour is injured", "food"), None);
        assert_eq!(result.category, Category::Hospital);
        assert_eq!(
            result.reason,
            ClassificationReason::Matched {
                source: TextSource::Text,
                keyword: "injured".to_string(),
            }
        );
    }

    #[test]
    fn test_need_details_take_part_in_rule_order() {
        let classifier = Classifier::default();
        let mut incident = need("we have run out", "water");
        incident.details = Some("house fire spread to the kitchen".to_string());
        assert_eq!(classifier.classify_incident(&incident, None).category, Category::Fire);
    }

    #[test]
    fn test_need_type_used_when_text_is_plain() {
        let classifier = Classifier::default();
        let result = classifier.classify_incident(&need("two adults and a child", "medical"), None);
        assert_eq!(result.category, Category::Hospital);
        assert_eq!(
            result.reason,
            ClassificationReason::Matched {
                source: TextSource::NeedType,
                keyword: "medical".to_string(),
            }
        );
    }

    #[test]
    fn test_source_first_needs_when_configured() {
        let classifier = Classifier::new(&ClassifierConfig {
            need_scan: ScanOrder::SourceFirst,
            ..Default::default()
        });
        let result = classifier.classify_incident(&need("my neighbour is injured", "food"), None);
        assert_eq!(result.category, Category::Rescue);
    }

    #[test]
    fn test_custom_rules_and_blank_keywords() {
        let classifier = Classifier::new(&ClassifierConfig {
            rules: vec![KeywordRule::new("  ", Category::Police), KeywordRule::new("Gas Leak", Category::Fire)],
            ..Default::default()
        });
        let result = classifier.classify_incident(&report("strong gas leak smell"), None);
        assert_eq!(result.category, Category::Fire);

        let result = classifier.classify_incident(&report("anything"), None);
        assert_eq!(result.reason, ClassificationReason::Default);
    }

    #[test]
    fn test_deterministic() {
        let classifier = Classifier::default();
        let incident = report("flood water rising").with_tag("fire", 0.4);
        let first = classifier.classify_incident(&incident, None);
        for _ in 0..10 {
            assert_eq!(classifier.classify_incident(&incident, None), first);
        }
    }
}
