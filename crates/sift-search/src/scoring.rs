//! Fallback text scoring.
//!
//! Per field: an exact match of the free text scores 10, a substring match
//! 5, and any keyword appearing in the value adds 1. Each field's points are
//! multiplied by its configured weight and summed over the record.

use std::collections::HashSet;

use sift_core::config::SearchConfig;
use sift_core::types::{FieldMapping, Record};

const EXACT_MATCH: f64 = 10.0;
const SUBSTRING_MATCH: f64 = 5.0;
const KEYWORD_MATCH: f64 = 1.0;

/// Scores records against a query's free text and keywords.
#[derive(Debug, Clone, Copy)]
pub struct TextScorer<'a> {
    config: &'a SearchConfig,
    mapping: &'a FieldMapping,
}

impl<'a> TextScorer<'a> {
    pub fn new(config: &'a SearchConfig, mapping: &'a FieldMapping) -> Self {
        Self { config, mapping }
    }

    /// Weight for `field`: its own entry, else its canonical role's entry,
    /// else the `default` entry.
    pub fn weight(&self, field: &str) -> f64 {
        if let Some(w) = self.config.field_weights.get(field) {
            return *w;
        }
        if let Some(w) = self
            .mapping
            .role_of(field)
            .and_then(|role| self.config.field_weights.get(role.as_str()))
        {
            return *w;
        }
        self.config.weight_for(field)
    }

    /// Score `record`, ignoring fields in `skip`.
    pub fn score(
        &self,
        record: &Record,
        free_text: &str,
        keywords: &[String],
        skip: &HashSet<&str>,
    ) -> f64 {
        let needle = free_text.trim().to_lowercase();
        let mut total = 0.0;

        for (field, _) in record.iter() {
            if skip.contains(field.as_str()) || field.starts_with('_') {
                continue;
            }
            let Some(value) = record.get_text(field) else {
                continue;
            };
            let value = value.to_lowercase();

            let mut points = 0.0;
            if !needle.is_empty() {
                if value == needle {
                    points += EXACT_MATCH;
                } else if value.contains(&needle) {
                    points += SUBSTRING_MATCH;
                }
            }
            if keywords.iter().any(|k| value.contains(k.as_str())) {
                points += KEYWORD_MATCH;
            }

            if points > 0.0 {
                total += points * self.weight(field);
            }
        }
        total
    }

    /// True when any field of `record` contains `keyword`.
    pub fn mentions(&self, record: &Record, keyword: &str) -> bool {
        record.iter().any(|(field, _)| {
            !field.starts_with('_')
                && record
                    .get_text(field)
                    .is_some_and(|v| v.to_lowercase().contains(keyword))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sift_core::types::CanonicalField;

    fn record() -> Record {
        Record::from_value(json!({
            "job_name": "Nightly Backup",
            "description": "backup of the warehouse",
            "status": "failed",
            "owner": "ops",
        }))
        .unwrap()
    }

    fn mapping() -> FieldMapping {
        FieldMapping::new()
            .with_role(CanonicalField::Name, ["job_name"])
            .with_role(CanonicalField::Status, ["status"])
    }

    #[test]
    fn test_weight_lookup_order() {
        let config = SearchConfig::default();
        let mapping = mapping();
        let scorer = TextScorer::new(&config, &mapping);
        assert_eq!(scorer.weight("description"), 1.5);
        assert_eq!(scorer.weight("job_name"), 2.0);
        assert_eq!(scorer.weight("owner"), 0.5);
    }

    #[test]
    fn test_exact_substring_and_keyword() {
        let config = SearchConfig::default();
        let mapping = mapping();
        let scorer = TextScorer::new(&config, &mapping);
        let none = HashSet::new();

        // job_name exact (10 + 1) * 2.0, description substring (5 + 1) * 1.5
        let score = scorer.score(&record(), "nightly backup", &["nightly".into(), "backup".into()], &none);
        assert!((score - (11.0 * 2.0 + 1.0 * 1.5)).abs() < 1e-9, "{score}");

        let score = scorer.score(&record(), "backup", &["backup".into()], &none);
        assert!((score - (6.0 * 2.0 + 6.0 * 1.5)).abs() < 1e-9, "{score}");
    }

    #[test]
    fn test_skip_fields() {
        let config = SearchConfig::default();
        let mapping = mapping();
        let scorer = TextScorer::new(&config, &mapping);
        let skip: HashSet<&str> = ["status"].into_iter().collect();
        assert_eq!(scorer.score(&record(), "failed", &["failed".into()], &skip), 0.0);
        assert!(scorer.score(&record(), "failed", &["failed".into()], &HashSet::new()) > 0.0);
    }

    #[test]
    fn test_no_match_scores_zero() {
        let config = SearchConfig::default();
        let mapping = mapping();
        let scorer = TextScorer::new(&config, &mapping);
        assert_eq!(scorer.score(&record(), "kafka", &["kafka".into()], &HashSet::new()), 0.0);
        assert!(!scorer.mentions(&record(), "kafka"));
        assert!(scorer.mentions(&record(), "warehouse"));
    }
}
