//! Natural-language query parser.
//!
//! Turns a raw query into [`ParsedQuery`]: typed filters from `field:value`
//! and `field OP value` expressions, relative-time constraints, and the
//! free text that remains once those spans are cut out.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use sift_core::filter::{Filter, FilterOp, FilterValue, DAYS_AGO_FIELD, RECENT_FIELD};
use sift_core::types::{parse_timestamp, CanonicalField, FieldMapping};

use crate::temporal::{extract_temporal, TemporalFilter};

// =============================================================================
// Compiled regex sets
// =============================================================================

static FIELD_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(\w+)[:=](?:"([^"]*)"|'([^']*)'|([^\s"']\S*))"#)
        .expect("Invalid field:value regex")
});

static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(\w+)\s*(>=|<=|!=|>|<|=|~)\s*(?:"([^"]*)"|'([^']*)'|([^\s"']+))"#)
        .expect("Invalid comparison regex")
});

/// Operator prefixes allowed on an unquoted `field:value` operand.
const VALUE_PREFIX_OPS: &[&str] = &[">=", "<=", "!=", ">", "<", "~"];

static STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "will", "would", "can", "could", "i", "me", "my", "we", "our", "you", "your",
    "it", "its", "they", "them", "their", "what", "which", "who", "this", "that", "these",
    "those", "of", "in", "to", "for", "with", "on", "at", "from", "by", "as", "into", "and",
    "but", "or", "not", "no", "all", "any", "some", "how", "when", "where", "why", "there",
    "get", "give", "list",
];

/// Words that signal semantic intent and carry no content of their own.
static TRIGGER_WORDS: &[&str] = &[
    "like", "similar", "about", "related", "find", "search", "show", "concerning",
    "regarding", "resembling",
];

// =============================================================================
// ParsedQuery
// =============================================================================

/// Output of [`QueryParser::parse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub raw: String,
    /// Typed filters, ANDed.
    pub filters: Vec<Filter>,
    /// Relative-time constraints, lowered to filters at search time.
    pub temporal: Vec<TemporalFilter>,
    /// Query text left after structured and temporal spans are removed.
    pub free_text: String,
    /// Structured spans recognised, including ones whose value failed to
    /// convert and was dropped.
    pub structured_patterns: usize,
}

impl ParsedQuery {
    /// True when any field, operator or temporal pattern was recognised.
    pub fn has_structured(&self) -> bool {
        self.structured_patterns > 0 || !self.filters.is_empty() || !self.temporal.is_empty()
    }

    /// Content words of the free text: lowercased, stop and trigger words
    /// removed, shorter than three characters dropped.
    pub fn keywords(&self) -> Vec<String> {
        extract_keywords(&self.free_text)
    }
}

/// Content words of `text`. See [`ParsedQuery::keywords`].
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let clean = word
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .to_lowercase();
        if clean.chars().count() <= 2 {
            continue;
        }
        if STOP_WORDS.contains(&clean.as_str()) || TRIGGER_WORDS.contains(&clean.as_str()) {
            continue;
        }
        if !out.contains(&clean) {
            out.push(clean);
        }
    }
    out
}

enum Extracted {
    /// Not a known field; the span stays in the free text.
    NotAField,
    /// Known field but the value did not convert; the span is consumed.
    Dropped,
    Filter(Filter),
    Temporal(TemporalFilter),
}

// =============================================================================
// QueryParser
// =============================================================================

/// Rule-based parser bound to one dataset's fields.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    fields: Vec<String>,
    mapping: FieldMapping,
}

impl QueryParser {
    /// Parser that only accepts filters on `fields` (or canonical role
    /// names resolvable through `mapping`).
    pub fn new(fields: Vec<String>, mapping: FieldMapping) -> Self {
        Self { fields, mapping }
    }

    /// Parser that accepts any field name.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    /// Resolve a query-side field name to a source field or pseudo-field.
    pub fn resolve_field(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case(DAYS_AGO_FIELD) {
            return Some(DAYS_AGO_FIELD.to_string());
        }
        if name.eq_ignore_ascii_case(RECENT_FIELD) {
            return Some(RECENT_FIELD.to_string());
        }
        if let Some(f) = self.fields.iter().find(|f| f.as_str() == name) {
            return Some(f.clone());
        }
        if let Some(f) = self.fields.iter().find(|f| f.eq_ignore_ascii_case(name)) {
            return Some(f.clone());
        }
        if let Some(f) = self.mapping.resolve(name) {
            return Some(f.to_string());
        }
        if self.fields.is_empty() {
            return Some(name.to_string());
        }
        None
    }

    /// Parse a raw query.
    ///
    /// Passes run in order over the shrinking remainder: `field:value` /
    /// `field=value`, then `field OP value`, then temporal phrases. Each
    /// recognised span is removed before the next pass.
    pub fn parse(&self, raw: &str) -> ParsedQuery {
        let mut filters = Vec::new();
        let mut temporal = Vec::new();
        let mut structured_patterns = 0usize;

        let mut record = |outcome: Extracted, span: &str| -> String {
            match outcome {
                Extracted::NotAField => span.to_string(),
                Extracted::Dropped => {
                    structured_patterns += 1;
                    " ".to_string()
                }
                Extracted::Filter(f) => {
                    structured_patterns += 1;
                    filters.push(f);
                    " ".to_string()
                }
                Extracted::Temporal(t) => {
                    structured_patterns += 1;
                    temporal.push(t);
                    " ".to_string()
                }
            }
        };

        let after_pairs = FIELD_VALUE_RE
            .replace_all(raw, |caps: &Captures<'_>| {
                let (value, quoted) = quoted_value(caps, 2);
                let outcome = self.extract(&caps[1], FilterOp::Eq, value, quoted, true);
                record(outcome, &caps[0])
            })
            .into_owned();

        let after_comparisons = COMPARISON_RE
            .replace_all(&after_pairs, |caps: &Captures<'_>| {
                let Some(op) = FilterOp::from_symbol(&caps[2]) else {
                    return caps[0].to_string();
                };
                let (value, quoted) = quoted_value(caps, 3);
                let outcome = self.extract(&caps[1], op, value, quoted, false);
                record(outcome, &caps[0])
            })
            .into_owned();

        let (phrases, rest) = extract_temporal(&after_comparisons);
        structured_patterns += phrases.len();
        temporal.extend(phrases);

        let free_text = rest.split_whitespace().collect::<Vec<_>>().join(" ");

        ParsedQuery {
            raw: raw.to_string(),
            filters,
            temporal,
            free_text,
            structured_patterns,
        }
    }

    fn extract(
        &self,
        field_raw: &str,
        mut op: FilterOp,
        value: &str,
        quoted: bool,
        allow_prefix: bool,
    ) -> Extracted {
        let Some(field) = self.resolve_field(field_raw) else {
            return Extracted::NotAField;
        };

        let mut value = value.trim();
        if allow_prefix && !quoted {
            if let Some(prefix) = VALUE_PREFIX_OPS.iter().find(|p| value.starts_with(**p)) {
                if let Some(prefixed) = FilterOp::from_symbol(prefix) {
                    op = prefixed;
                    value = value[prefix.len()..].trim();
                }
            }
        }

        if field == DAYS_AGO_FIELD {
            return match value.parse::<f64>() {
                Ok(days) if days >= 0.0 => Extracted::Temporal(TemporalFilter::WithinDays { days }),
                _ => self.dropped(&field, value),
            };
        }
        if field == RECENT_FIELD {
            return match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Extracted::Temporal(TemporalFilter::Latest),
                _ => self.dropped(&field, value),
            };
        }

        if op == FilterOp::Eq && !quoted && value.contains(',') {
            let options: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            return if options.is_empty() {
                self.dropped(&field, value)
            } else {
                Extracted::Filter(Filter::new(field, FilterOp::In, FilterValue::List(options)))
            };
        }

        match self.convert(&field, op, value) {
            Some(typed) => Extracted::Filter(Filter::new(field, op, typed)),
            None => self.dropped(&field, value),
        }
    }

    /// Convert `value` to the type `field` (and `op`) demand.
    fn convert(&self, field: &str, op: FilterOp, value: &str) -> Option<FilterValue> {
        if op == FilterOp::Contains {
            return Some(FilterValue::Text(value.to_string()));
        }
        let is_timestamp = self.mapping.is_timestamp(field)
            || self.mapping.role_of(field) == Some(CanonicalField::Timestamp);
        if is_timestamp {
            return parse_timestamp(value).map(FilterValue::Timestamp);
        }
        if self.mapping.is_numeric(field) {
            return value.parse::<f64>().ok().map(FilterValue::Number);
        }
        if op.is_ordering() {
            return value
                .parse::<f64>()
                .ok()
                .map(FilterValue::Number)
                .or_else(|| parse_timestamp(value).map(FilterValue::Timestamp));
        }
        Some(FilterValue::Text(value.to_string()))
    }

    fn dropped(&self, field: &str, value: &str) -> Extracted {
        debug!(field, value, "Dropping filter whose value does not convert");
        Extracted::Dropped
    }
}

/// Value from the first populated of the double-quoted, single-quoted and
/// bare capture groups starting at `first`.
fn quoted_value<'h>(caps: &Captures<'h>, first: usize) -> (&'h str, bool) {
    if let Some(m) = caps.get(first) {
        return (m.as_str(), true);
    }
    if let Some(m) = caps.get(first + 1) {
        return (m.as_str(), true);
    }
    (caps.get(first + 2).map(|m| m.as_str()).unwrap_or(""), false)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn job_fields() -> Vec<String> {
        [
            "job_id",
            "job_name",
            "status",
            "duration_minutes",
            "created_at",
            "description",
            "owner",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn job_mapping() -> FieldMapping {
        FieldMapping::new()
            .with_role(CanonicalField::Id, ["job_id"])
            .with_role(CanonicalField::Name, ["job_name"])
            .with_role(CanonicalField::Status, ["status"])
            .with_role(CanonicalField::Timestamp, ["created_at"])
            .with_role(CanonicalField::Numeric, ["duration_minutes"])
            .with_role(CanonicalField::Text, ["description", "owner"])
    }

    fn parser() -> QueryParser {
        QueryParser::new(job_fields(), job_mapping())
    }

    #[test]
    fn test_simple_field_value() {
        let parsed = parser().parse("status:failed");
        assert_eq!(parsed.filters, vec![Filter::eq_text("status", "failed")]);
        assert_eq!(parsed.free_text, "");
        assert!(parsed.has_structured());
    }

    #[test]
    fn test_field_equals_value() {
        let parsed = parser().parse("owner=alice nightly");
        assert_eq!(parsed.filters, vec![Filter::eq_text("owner", "alice")]);
        assert_eq!(parsed.free_text, "nightly");
    }

    #[test]
    fn test_quoted_value_keeps_spaces() {
        let parsed = parser().parse(r#"job_name:"nightly db backup" failures"#);
        assert_eq!(
            parsed.filters,
            vec![Filter::eq_text("job_name", "nightly db backup")]
        );
        assert_eq!(parsed.free_text, "failures");

        let parsed = parser().parse("job_name:'weekly report'");
        assert_eq!(parsed.filters, vec![Filter::eq_text("job_name", "weekly report")]);
    }

    #[test]
    fn test_comparison_numeric() {
        let parsed = parser().parse("duration_minutes>30");
        assert_eq!(
            parsed.filters,
            vec![Filter::new("duration_minutes", FilterOp::Gt, FilterValue::Number(30.0))]
        );
    }

    #[test]
    fn test_comparison_with_spaces() {
        let parsed = parser().parse("jobs with duration_minutes >= 12.5");
        assert_eq!(
            parsed.filters,
            vec![Filter::new("duration_minutes", FilterOp::Gte, FilterValue::Number(12.5))]
        );
        assert_eq!(parsed.free_text, "jobs with");
    }

    #[test]
    fn test_not_equal_and_contains() {
        let parsed = parser().parse("status!=success job_name~backup");
        assert_eq!(
            parsed.filters,
            vec![
                Filter::new("status", FilterOp::Neq, FilterValue::Text("success".into())),
                Filter::new("job_name", FilterOp::Contains, FilterValue::Text("backup".into())),
            ]
        );
    }

    #[test]
    fn test_value_prefix_operator() {
        let parsed = parser().parse("duration_minutes:>45");
        assert_eq!(
            parsed.filters,
            vec![Filter::new("duration_minutes", FilterOp::Gt, FilterValue::Number(45.0))]
        );
    }

    #[test]
    fn test_comma_list_becomes_in() {
        let parsed = parser().parse("status:failed,running");
        assert_eq!(
            parsed.filters,
            vec![Filter::new(
                "status",
                FilterOp::In,
                FilterValue::List(vec!["failed".into(), "running".into()])
            )]
        );
    }

    #[test]
    fn test_unconvertible_value_is_dropped() {
        let parsed = parser().parse("duration_minutes:long backups");
        assert!(parsed.filters.is_empty());
        assert!(parsed.has_structured());
        assert_eq!(parsed.free_text, "backups");
    }

    #[test]
    fn test_unknown_field_stays_in_text() {
        let parsed = parser().parse("see http://example.com at 10:30");
        assert!(parsed.filters.is_empty());
        assert!(!parsed.has_structured());
        assert_eq!(parsed.free_text, "see http://example.com at 10:30");
    }

    #[test]
    fn test_role_name_resolves_through_mapping() {
        let parsed = parser().parse("name:etl");
        assert_eq!(parsed.filters, vec![Filter::eq_text("job_name", "etl")]);
    }

    #[test]
    fn test_field_name_case_insensitive() {
        let parsed = parser().parse("STATUS:failed");
        assert_eq!(parsed.filters, vec![Filter::eq_text("status", "failed")]);
    }

    #[test]
    fn test_timestamp_field_converts() {
        let parsed = parser().parse("created_at>2024-03-01");
        assert_eq!(parsed.filters.len(), 1);
        assert_eq!(parsed.filters[0].value_type(), "timestamp");

        let parsed = parser().parse("created_at>soon");
        assert!(parsed.filters.is_empty());
    }

    #[test]
    fn test_temporal_phrase() {
        let parsed = parser().parse("jobs from last 7 days");
        assert!(parsed.filters.is_empty());
        assert_eq!(parsed.temporal, vec![TemporalFilter::WithinDays { days: 7.0 }]);
        assert_eq!(parsed.free_text, "jobs from");
        assert!(parsed.has_structured());
    }

    #[test]
    fn test_days_ago_pseudo_field() {
        let parsed = parser().parse("days_ago:3 failures");
        assert_eq!(parsed.temporal, vec![TemporalFilter::WithinDays { days: 3.0 }]);
        assert!(parsed.filters.is_empty());

        let parsed = parser().parse("days_ago<=10");
        assert_eq!(parsed.temporal, vec![TemporalFilter::WithinDays { days: 10.0 }]);
    }

    #[test]
    fn test_recent_pseudo_field() {
        let parsed = parser().parse("recent:true");
        assert_eq!(parsed.temporal, vec![TemporalFilter::Latest]);
    }

    #[test]
    fn test_multiple_filters_and_free_text() {
        let parsed = parser().parse("status:failed duration_minutes>30 backup jobs last 2 weeks");
        assert_eq!(parsed.filters.len(), 2);
        assert_eq!(parsed.temporal, vec![TemporalFilter::WithinDays { days: 14.0 }]);
        assert_eq!(parsed.free_text, "backup jobs");
    }

    #[test]
    fn test_permissive_accepts_any_field() {
        let parsed = QueryParser::permissive().parse("team:infra");
        assert_eq!(parsed.filters, vec![Filter::eq_text("team", "infra")]);
    }

    #[test]
    fn test_plain_text_query() {
        let parsed = parser().parse("jobs similar to database backup");
        assert!(parsed.filters.is_empty());
        assert!(!parsed.has_structured());
        assert_eq!(parsed.free_text, "jobs similar to database backup");
    }

    #[test]
    fn test_keywords() {
        let parsed = parser().parse("show me jobs like the database backup!");
        assert_eq!(parsed.keywords(), vec!["jobs", "database", "backup"]);
    }

    #[test]
    fn test_keywords_dedup() {
        assert_eq!(extract_keywords("backup Backup BACKUP"), vec!["backup"]);
    }

    #[test]
    fn test_empty_query() {
        let parsed = parser().parse("   ");
        assert!(parsed.filters.is_empty());
        assert_eq!(parsed.free_text, "");
        assert!(!parsed.has_structured());
    }
}
