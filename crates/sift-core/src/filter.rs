//! Filter predicates and their in-memory evaluation.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{parse_timestamp, FieldMapping, Record};

/// Pseudo-field selecting only rows that carry the latest timestamp.
pub const RECENT_FIELD: &str = "recent";

/// Pseudo-field expressing a relative lower bound in days.
pub const DAYS_AGO_FIELD: &str = "days_ago";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    In,
}

impl FilterOp {
    /// Map a query-syntax operator to a filter op.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" | ":" => Some(FilterOp::Eq),
            "!=" => Some(FilterOp::Neq),
            ">" => Some(FilterOp::Gt),
            ">=" => Some(FilterOp::Gte),
            "<" => Some(FilterOp::Lt),
            "<=" => Some(FilterOp::Lte),
            "~" => Some(FilterOp::Contains),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Contains => "~",
            FilterOp::In => "in",
        }
    }

    /// True for the range comparisons.
    pub fn is_ordering(&self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte)
    }

    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            FilterOp::Eq => ord == Ordering::Equal,
            FilterOp::Neq => ord != Ordering::Equal,
            FilterOp::Gt => ord == Ordering::Greater,
            FilterOp::Gte => ord != Ordering::Less,
            FilterOp::Lt => ord == Ordering::Less,
            FilterOp::Lte => ord != Ordering::Greater,
            FilterOp::Contains | FilterOp::In => false,
        }
    }
}

/// Typed filter operand. The variant is the filter's type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FilterValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    List(Vec<String>),
}

impl FilterValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            FilterValue::Text(_) => "text",
            FilterValue::Number(_) => "number",
            FilterValue::Timestamp(_) => "timestamp",
            FilterValue::Bool(_) => "bool",
            FilterValue::List(_) => "list",
        }
    }
}

/// A single predicate `field op value`. Filters in a query are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq_text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Eq, FilterValue::Text(value.into()))
    }

    pub fn value_type(&self) -> &'static str {
        self.value.type_tag()
    }

    pub fn is_recent(&self) -> bool {
        self.field == RECENT_FIELD
    }

    /// Evaluate against a single record.
    ///
    /// Missing or null fields never match. Text equality is case-insensitive.
    /// The `recent` pseudo-filter needs the whole row set and always passes
    /// here; see [`apply_filters`].
    pub fn matches(&self, record: &Record) -> bool {
        if self.is_recent() {
            return true;
        }
        let Some(raw) = record.get(&self.field) else {
            return false;
        };
        if raw.is_null() {
            return false;
        }

        match (&self.op, &self.value) {
            (FilterOp::Contains, FilterValue::Text(needle)) => record
                .get_text(&self.field)
                .is_some_and(|v| v.to_lowercase().contains(&needle.to_lowercase())),
            (FilterOp::In, FilterValue::List(options)) => record
                .get_text(&self.field)
                .is_some_and(|v| options.iter().any(|o| o.eq_ignore_ascii_case(&v))),
            (op, FilterValue::Text(expected)) => record
                .get_text(&self.field)
                .is_some_and(|v| op.accepts(v.to_lowercase().cmp(&expected.to_lowercase()))),
            (op, FilterValue::Number(expected)) => match record.get_f64(&self.field) {
                Some(v) => v.partial_cmp(expected).is_some_and(|ord| op.accepts(ord)),
                None => *op == FilterOp::Neq,
            },
            (op, FilterValue::Timestamp(expected)) => record
                .get_timestamp(&self.field)
                .is_some_and(|v| op.accepts(v.cmp(expected))),
            (op, FilterValue::Bool(expected)) => {
                let actual = match raw {
                    serde_json::Value::Bool(b) => Some(*b),
                    other => other
                        .as_str()
                        .and_then(|s| s.trim().to_ascii_lowercase().parse::<bool>().ok()),
                };
                actual.is_some_and(|b| op.accepts(b.cmp(expected)))
            }
            (_, FilterValue::List(_)) => false,
        }
    }
}

/// Apply `filters` (ANDed) to `records`, honouring the `recent` pseudo-filter
/// against the mapping's timestamp field.
pub fn apply_filters(records: Vec<Record>, filters: &[Filter], mapping: &FieldMapping) -> Vec<Record> {
    let mut kept: Vec<Record> = records
        .into_iter()
        .filter(|r| filters.iter().all(|f| f.matches(r)))
        .collect();

    if filters.iter().any(Filter::is_recent) {
        match mapping.timestamp_field() {
            Some(ts_field) => {
                let latest = kept.iter().filter_map(|r| r.get_timestamp(ts_field)).max();
                kept.retain(|r| latest.is_some() && r.get_timestamp(ts_field) == latest);
            }
            None => kept.clear(),
        }
    }

    kept
}

/// Parse a user-supplied filter operand into a timestamp.
pub fn parse_filter_timestamp(raw: &str) -> Option<FilterValue> {
    parse_timestamp(raw).map(FilterValue::Timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanonicalField;
    use serde_json::json;

    fn rec(v: serde_json::Value) -> Record {
        Record::from_value(v).unwrap()
    }

    #[test]
    fn test_eq_text_case_insensitive() {
        let r = rec(json!({"status": "FAILED"}));
        assert!(Filter::eq_text("status", "failed").matches(&r));
        assert!(!Filter::eq_text("status", "running").matches(&r));
    }

    #[test]
    fn test_missing_or_null_field_never_matches() {
        let r = rec(json!({"status": null}));
        assert!(!Filter::eq_text("status", "failed").matches(&r));
        assert!(!Filter::eq_text("owner", "x").matches(&r));
    }

    #[test]
    fn test_numeric_comparisons() {
        let r = rec(json!({"duration_minutes": 45}));
        let gt = |n: f64| Filter::new("duration_minutes", FilterOp::Gt, FilterValue::Number(n));
        assert!(gt(30.0).matches(&r));
        assert!(!gt(45.0).matches(&r));
        assert!(Filter::new("duration_minutes", FilterOp::Gte, FilterValue::Number(45.0)).matches(&r));
        assert!(Filter::new("duration_minutes", FilterOp::Lt, FilterValue::Number(46.0)).matches(&r));
        assert!(Filter::new("duration_minutes", FilterOp::Lte, FilterValue::Number(45.0)).matches(&r));
        assert!(Filter::new("duration_minutes", FilterOp::Eq, FilterValue::Number(45.0)).matches(&r));
        assert!(Filter::new("duration_minutes", FilterOp::Neq, FilterValue::Number(1.0)).matches(&r));
    }

    #[test]
    fn test_numeric_string_values() {
        let r = rec(json!({"duration_minutes": "45.5"}));
        assert!(Filter::new("duration_minutes", FilterOp::Gt, FilterValue::Number(45.0)).matches(&r));
    }

    #[test]
    fn test_contains_and_in() {
        let r = rec(json!({"name": "Nightly Backup", "status": "Running"}));
        assert!(Filter::new("name", FilterOp::Contains, FilterValue::Text("backup".into())).matches(&r));
        let list = FilterValue::List(vec!["failed".into(), "running".into()]);
        assert!(Filter::new("status", FilterOp::In, list).matches(&r));
    }

    #[test]
    fn test_timestamp_lower_bound() {
        let r = rec(json!({"created_at": "2024-03-10 08:00:00"}));
        let bound = parse_timestamp("2024-03-01 00:00:00").unwrap();
        let f = Filter::new("created_at", FilterOp::Gte, FilterValue::Timestamp(bound));
        assert!(f.matches(&r));
        let later = parse_timestamp("2024-04-01").unwrap();
        let f = Filter::new("created_at", FilterOp::Gte, FilterValue::Timestamp(later));
        assert!(!f.matches(&r));
    }

    #[test]
    fn test_apply_filters_recent_keeps_latest() {
        let mapping = FieldMapping::new().with_role(CanonicalField::Timestamp, ["created_at"]);
        let records = vec![
            rec(json!({"id": 1, "created_at": "2024-03-01 00:00:00"})),
            rec(json!({"id": 2, "created_at": "2024-03-05 00:00:00"})),
            rec(json!({"id": 3, "created_at": "2024-03-05 00:00:00"})),
        ];
        let recent = Filter::new(RECENT_FIELD, FilterOp::Eq, FilterValue::Bool(true));
        let kept = apply_filters(records, &[recent], &mapping);
        let ids: Vec<String> = kept.iter().filter_map(|r| r.get_text("id")).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn test_apply_filters_is_conjunctive() {
        let mapping = FieldMapping::new();
        let records = vec![
            rec(json!({"status": "failed", "d": 10})),
            rec(json!({"status": "failed", "d": 50})),
            rec(json!({"status": "ok", "d": 50})),
        ];
        let filters = vec![
            Filter::eq_text("status", "failed"),
            Filter::new("d", FilterOp::Gt, FilterValue::Number(30.0)),
        ];
        assert_eq!(apply_filters(records, &filters, &mapping).len(), 1);
    }

    #[test]
    fn test_op_symbols() {
        for sym in ["=", "!=", ">", ">=", "<", "<=", "~"] {
            let op = FilterOp::from_symbol(sym).unwrap();
            assert_eq!(op.symbol(), sym);
        }
        assert_eq!(FilterOp::from_symbol(":"), Some(FilterOp::Eq));
        assert!(FilterOp::from_symbol("=>").is_none());
    }

    #[test]
    fn test_value_type_tags() {
        assert_eq!(Filter::eq_text("a", "b").value_type(), "text");
        let f = Filter::new("a", FilterOp::Gt, FilterValue::Number(1.0));
        assert_eq!(f.value_type(), "number");
    }
}
