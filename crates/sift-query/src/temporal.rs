//! Relative-time phrase extraction.
//!
//! Phrases such as "last 7 days", "yesterday" or "latest" become
//! [`TemporalFilter`]s and are cut out of the query text so they do not
//! leak into free-text matching.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use sift_core::filter::{Filter, FilterOp, FilterValue, RECENT_FIELD};
use sift_core::types::FieldMapping;

/// A time constraint relative to "now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemporalFilter {
    /// Timestamp no older than `days` before now.
    WithinDays { days: f64 },
    /// Only rows carrying the latest timestamp.
    Latest,
}

impl TemporalFilter {
    /// Lower this constraint into a concrete filter against the mapping's
    /// primary timestamp field. `None` when no timestamp field is mapped.
    pub fn to_filter(&self, mapping: &FieldMapping, now: DateTime<Utc>) -> Option<Filter> {
        let ts_field = mapping.timestamp_field()?;
        match self {
            TemporalFilter::WithinDays { days } => {
                let secs = (days * 86_400.0).round() as i64;
                let bound = now - Duration::seconds(secs);
                Some(Filter::new(ts_field, FilterOp::Gte, FilterValue::Timestamp(bound)))
            }
            TemporalFilter::Latest => Some(Filter::new(
                RECENT_FIELD,
                FilterOp::Eq,
                FilterValue::Bool(true),
            )),
        }
    }
}

// =============================================================================
// Compiled patterns
// =============================================================================

struct TemporalPatterns {
    relative: Regex,
    ago: Regex,
    fixed: Vec<(Regex, f64)>,
    latest: Regex,
    recent: Regex,
}

static TEMPORAL_PATTERNS: LazyLock<TemporalPatterns> = LazyLock::new(|| {
    let re = |p: &str| Regex::new(p).expect("Invalid temporal regex");

    TemporalPatterns {
        relative: re(
            r"(?i)\b(?:last|past|previous)\s+(\d+(?:\.\d+)?)\s+(hour|day|week|month|year)s?\b",
        ),
        ago: re(r"(?i)\b(\d+(?:\.\d+)?)\s+(hour|day|week|month|year)s?\s+ago\b"),
        fixed: vec![
            (re(r"(?i)\btoday\b"), 1.0),
            (re(r"(?i)\byesterday\b"), 2.0),
            (re(r"(?i)\bthis\s+week\b"), 7.0),
            (re(r"(?i)\blast\s+week\b"), 14.0),
            (re(r"(?i)\bthis\s+month\b"), 30.0),
            (re(r"(?i)\blast\s+month\b"), 60.0),
            (re(r"(?i)\bthis\s+year\b"), 365.0),
            (re(r"(?i)\blast\s+year\b"), 730.0),
        ],
        latest: re(r"(?i)\b(?:latest|newest|most\s+recent)\b"),
        recent: re(r"(?i)\brecent(?:ly)?\b"),
    }
});

fn unit_days(unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "hour" => 1.0 / 24.0,
        "week" => 7.0,
        "month" => 30.0,
        "year" => 365.0,
        _ => 1.0,
    }
}

fn within_from_caps(caps: &Captures<'_>) -> Option<TemporalFilter> {
    let n: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str();
    Some(TemporalFilter::WithinDays {
        days: n * unit_days(unit),
    })
}

/// Extract every temporal phrase from `text`.
///
/// Returns the constraints in match order and the text with matched spans
/// replaced by whitespace.
pub fn extract_temporal(text: &str) -> (Vec<TemporalFilter>, String) {
    let tp = &*TEMPORAL_PATTERNS;
    let mut found = Vec::new();

    let mut rest = tp
        .relative
        .replace_all(text, |caps: &Captures<'_>| {
            found.extend(within_from_caps(caps));
            " "
        })
        .into_owned();

    rest = tp
        .ago
        .replace_all(&rest, |caps: &Captures<'_>| {
            found.extend(within_from_caps(caps));
            " "
        })
        .into_owned();

    for (re, days) in &tp.fixed {
        rest = re
            .replace_all(&rest, |_: &Captures<'_>| {
                found.push(TemporalFilter::WithinDays { days: *days });
                " "
            })
            .into_owned();
    }

    // "most recent" must be consumed before the bare "recent" pass.
    rest = tp
        .latest
        .replace_all(&rest, |_: &Captures<'_>| {
            found.push(TemporalFilter::Latest);
            " "
        })
        .into_owned();

    rest = tp
        .recent
        .replace_all(&rest, |_: &Captures<'_>| {
            found.push(TemporalFilter::WithinDays { days: 1.0 });
            " "
        })
        .into_owned();

    (found, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::types::CanonicalField;

    fn days_of(filters: &[TemporalFilter]) -> Vec<f64> {
        filters
            .iter()
            .filter_map(|f| match f {
                TemporalFilter::WithinDays { days } => Some(*days),
                TemporalFilter::Latest => None,
            })
            .collect()
    }

    #[test]
    fn test_last_n_days() {
        let (found, rest) = extract_temporal("jobs from last 7 days");
        assert_eq!(days_of(&found), vec![7.0]);
        assert_eq!(rest.split_whitespace().collect::<Vec<_>>(), vec!["jobs", "from"]);
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(days_of(&extract_temporal("past 2 weeks").0), vec![14.0]);
        assert_eq!(days_of(&extract_temporal("last 3 months").0), vec![90.0]);
        assert_eq!(days_of(&extract_temporal("last 1 year").0), vec![365.0]);
        assert_eq!(days_of(&extract_temporal("last 12 hours").0), vec![0.5]);
    }

    #[test]
    fn test_ago_phrase() {
        assert_eq!(days_of(&extract_temporal("failed 3 days ago").0), vec![3.0]);
    }

    #[test]
    fn test_fixed_phrases() {
        assert_eq!(days_of(&extract_temporal("today").0), vec![1.0]);
        assert_eq!(days_of(&extract_temporal("yesterday").0), vec![2.0]);
        assert_eq!(days_of(&extract_temporal("this week").0), vec![7.0]);
        assert_eq!(days_of(&extract_temporal("last week").0), vec![14.0]);
        assert_eq!(days_of(&extract_temporal("this month").0), vec![30.0]);
        assert_eq!(days_of(&extract_temporal("last month").0), vec![60.0]);
    }

    #[test]
    fn test_latest_vs_recent() {
        let (found, _) = extract_temporal("latest backup");
        assert_eq!(found, vec![TemporalFilter::Latest]);

        let (found, _) = extract_temporal("most recent backup");
        assert_eq!(found, vec![TemporalFilter::Latest]);

        let (found, _) = extract_temporal("recently failed");
        assert_eq!(days_of(&found), vec![1.0]);
    }

    #[test]
    fn test_no_temporal() {
        let (found, rest) = extract_temporal("status failed backups");
        assert!(found.is_empty());
        assert_eq!(rest, "status failed backups");
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(days_of(&extract_temporal("LAST 5 DAYS").0), vec![5.0]);
    }

    #[test]
    fn test_to_filter_lower_bound() {
        let mapping = FieldMapping::new().with_role(CanonicalField::Timestamp, ["created_at"]);
        let now = Utc::now();
        let f = TemporalFilter::WithinDays { days: 7.0 }
            .to_filter(&mapping, now)
            .unwrap();
        assert_eq!(f.field, "created_at");
        assert_eq!(f.op, FilterOp::Gte);
        assert_eq!(f.value, FilterValue::Timestamp(now - Duration::days(7)));
    }

    #[test]
    fn test_to_filter_latest_is_pseudo() {
        let mapping = FieldMapping::new().with_role(CanonicalField::Timestamp, ["created_at"]);
        let f = TemporalFilter::Latest.to_filter(&mapping, Utc::now()).unwrap();
        assert!(f.is_recent());
    }

    #[test]
    fn test_to_filter_without_timestamp_field() {
        let mapping = FieldMapping::new();
        assert!(TemporalFilter::Latest.to_filter(&mapping, Utc::now()).is_none());
    }
}
