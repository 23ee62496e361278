//! Shared data model: records, field roles, and search results.
//!
//! Records are schema-less maps of field name to JSON value. A
//! [`FieldMapping`] assigns canonical roles (id, name, status, ...) to the
//! source fields of a particular dataset so that the rest of the system can
//! reason about "the id field" or "the timestamp field" without knowing
//! the dataset's column names.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SiftError};

// =============================================================================
// Record
// =============================================================================

/// A single data record. Immutable once produced by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON value. Returns `None` for non-objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field value rendered as text. `None` when missing or null.
    pub fn get_text(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(value_to_text)
    }

    /// Field value as a number, parsing strings where needed.
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        match self.fields.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Field value as a UTC timestamp. See [`parse_timestamp`].
    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(field)? {
            Value::String(s) => parse_timestamp(s),
            Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            _ => None,
        }
    }

    /// The record's identifier according to `mapping`.
    pub fn id(&self, mapping: &FieldMapping) -> Option<String> {
        mapping.id_field().and_then(|f| self.get_text(f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Render a scalar JSON value as text. Null yields `None`.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Parse the timestamp formats found in typical job/record datasets.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]`, `YYYY-MM-DDTHH:MM:SS[.fff]`,
/// bare dates (midnight UTC) and integer epoch seconds. Naive values are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    }
    None
}

/// Canonical storage format for timestamps handed to SQL backends.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

// =============================================================================
// Field roles
// =============================================================================

/// Canonical role a source field can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalField {
    Id,
    Name,
    Status,
    Timestamp,
    Numeric,
    Text,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 6] = [
        CanonicalField::Id,
        CanonicalField::Name,
        CanonicalField::Status,
        CanonicalField::Timestamp,
        CanonicalField::Numeric,
        CanonicalField::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Id => "id",
            CanonicalField::Name => "name",
            CanonicalField::Status => "status",
            CanonicalField::Timestamp => "timestamp",
            CanonicalField::Numeric => "numeric",
            CanonicalField::Text => "text",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(name))
    }
}

/// Assignment of canonical roles to a dataset's source fields.
///
/// Each role maps to an ordered list of source fields; the first entry is
/// the role's primary field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    roles: BTreeMap<CanonicalField, Vec<String>>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `fields` to `role`, replacing any previous assignment.
    pub fn with_role<I, S>(mut self, role: CanonicalField, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            self.roles.remove(&role);
        } else {
            self.roles.insert(role, fields);
        }
        self
    }

    pub fn fields_for(&self, role: CanonicalField) -> &[String] {
        self.roles.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn primary(&self, role: CanonicalField) -> Option<&str> {
        self.fields_for(role).first().map(String::as_str)
    }

    pub fn id_field(&self) -> Option<&str> {
        self.primary(CanonicalField::Id)
    }

    pub fn name_field(&self) -> Option<&str> {
        self.primary(CanonicalField::Name)
    }

    pub fn status_field(&self) -> Option<&str> {
        self.primary(CanonicalField::Status)
    }

    pub fn timestamp_field(&self) -> Option<&str> {
        self.primary(CanonicalField::Timestamp)
    }

    /// First role (in declaration order) that lists `field`.
    pub fn role_of(&self, field: &str) -> Option<CanonicalField> {
        self.roles
            .iter()
            .find(|(_, fields)| fields.iter().any(|f| f == field))
            .map(|(role, _)| *role)
    }

    pub fn is_numeric(&self, field: &str) -> bool {
        self.fields_for(CanonicalField::Numeric).iter().any(|f| f == field)
    }

    pub fn is_timestamp(&self, field: &str) -> bool {
        self.fields_for(CanonicalField::Timestamp).iter().any(|f| f == field)
    }

    /// Resolve a canonical role name (`status`, `name`, ...) to its primary
    /// source field. Only single-valued roles resolve.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        match CanonicalField::from_name(name)? {
            role @ (CanonicalField::Id
            | CanonicalField::Name
            | CanonicalField::Status
            | CanonicalField::Timestamp) => self.primary(role),
            CanonicalField::Numeric | CanonicalField::Text => None,
        }
    }

    /// Detect roles from field names and a sample of values.
    pub fn infer(fields: &[String], records: &[Record]) -> Self {
        const SAMPLE: usize = 100;
        let sample = &records[..records.len().min(SAMPLE)];
        let lower = |f: &String| f.to_ascii_lowercase();

        let pick = |pred: &dyn Fn(&str) -> bool| -> Option<String> {
            fields.iter().find(|f| pred(&lower(f))).cloned()
        };

        let id = pick(&|f| f == "id").or_else(|| pick(&|f| f.ends_with("_id")));
        let name = pick(&|f| f == "name")
            .or_else(|| pick(&|f| f.ends_with("_name")))
            .or_else(|| pick(&|f| f == "title"));
        let status = pick(&|f| f == "status").or_else(|| pick(&|f| f == "state"));

        let timestamps: Vec<String> = fields
            .iter()
            .filter(|f| {
                let l = f.to_ascii_lowercase();
                l.contains("time") || l.contains("date") || l.ends_with("_at")
            })
            .cloned()
            .collect();

        let is_numeric = |field: &str| {
            let mut seen = false;
            for record in sample {
                match record.get(field) {
                    None | Some(Value::Null) => continue,
                    Some(Value::Number(_)) => seen = true,
                    Some(Value::String(s)) if s.trim().is_empty() => continue,
                    Some(Value::String(s)) => {
                        if s.trim().parse::<f64>().is_err() {
                            return false;
                        }
                        seen = true;
                    }
                    Some(_) => return false,
                }
            }
            seen
        };

        let claimed: HashSet<&String> = id
            .iter()
            .chain(name.iter())
            .chain(status.iter())
            .chain(timestamps.iter())
            .collect();

        let numeric: Vec<String> = fields
            .iter()
            .filter(|f| !claimed.contains(f) && is_numeric(f))
            .cloned()
            .collect();

        let text: Vec<String> = fields
            .iter()
            .filter(|f| !claimed.contains(f) && !numeric.contains(*f))
            .cloned()
            .collect();

        FieldMapping::new()
            .with_role(CanonicalField::Id, id)
            .with_role(CanonicalField::Name, name)
            .with_role(CanonicalField::Status, status)
            .with_role(CanonicalField::Timestamp, timestamps)
            .with_role(CanonicalField::Numeric, numeric)
            .with_role(CanonicalField::Text, text)
    }

    /// Fail unless every record has a distinct, non-empty id.
    pub fn validate_unique_ids(&self, records: &[Record]) -> Result<()> {
        let id_field = self
            .id_field()
            .ok_or_else(|| SiftError::InvalidMapping("no id field mapped".into()))?;
        let mut seen = HashSet::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let id = record.get_text(id_field).ok_or_else(|| {
                SiftError::InvalidMapping(format!("record {} has no '{}' value", i, id_field))
            })?;
            if !seen.insert(id.clone()) {
                return Err(SiftError::InvalidMapping(format!(
                    "duplicate id '{}' in field '{}'",
                    id, id_field
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Search results
// =============================================================================

/// How a result was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactId,
    Structured,
    Semantic,
    Hybrid,
    TextMatch,
    Count,
    Separator,
}

/// Which search path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Direct,
    Structured,
    Vector,
    Both,
    Aggregate,
}

/// Message carried by the sequential-strategy separator.
pub const SEPARATOR_MESSAGE: &str = "Vector search results (semantic matches) below:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub record: Record,
    pub score: f64,
    pub match_type: MatchType,
    pub origin: Origin,
}

impl SearchResult {
    pub fn new(record: Record, score: f64, match_type: MatchType, origin: Origin) -> Self {
        Self {
            record,
            score,
            match_type,
            origin,
        }
    }

    /// Marker placed between the structured and vector groups.
    pub fn separator() -> Self {
        let record = Record::new()
            .with("_separator", true)
            .with("_message", SEPARATOR_MESSAGE)
            .with("_result_type", "separator");
        Self::new(record, 0.0, MatchType::Separator, Origin::Aggregate)
    }

    pub fn is_separator(&self) -> bool {
        self.match_type == MatchType::Separator
    }

    /// Identity key used for deduplication.
    pub fn key(&self, id_field: &str) -> Option<String> {
        self.record.get_text(id_field)
    }
}
