//! Data provider capability trait.
//!
//! The orchestrator talks to its backing data only through this trait, so
//! an in-memory record set and a SQLite table are interchangeable.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::filter::Filter;
use crate::types::{FieldMapping, Record};

/// Boxed future returned by [`DataProvider::filter_batch`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Group label for records whose group-by field is missing or null.
pub const UNGROUPED: &str = "(none)";

/// Result of a counting query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountSummary {
    pub count: usize,
    pub target: Option<String>,
    pub group_by: Option<String>,
    pub groups: BTreeMap<String, usize>,
}

impl CountSummary {
    /// Count `records`, optionally bucketing by the text value of `group_by`.
    pub fn from_records(records: &[Record], group_by: Option<&str>) -> Self {
        let mut groups = BTreeMap::new();
        if let Some(field) = group_by {
            for record in records {
                let key = record
                    .get_text(field)
                    .unwrap_or_else(|| UNGROUPED.to_string());
                *groups.entry(key).or_insert(0) += 1;
            }
        }
        Self {
            count: records.len(),
            target: None,
            group_by: group_by.map(str::to_string),
            groups,
        }
    }
}

/// Backing store for records.
pub trait DataProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Field names available on records, in source order.
    fn fields(&self) -> &[String];

    fn mapping(&self) -> &FieldMapping;

    /// Every record, in source order.
    fn records(&self) -> Result<Vec<Record>>;

    fn get_by_id(&self, id: &str) -> Result<Option<Record>>;

    /// Records matching all `filters`, at most `max_rows`, in source order.
    fn filter(&self, filters: &[Filter], max_rows: usize) -> Result<Vec<Record>>;

    /// Run several independent filter sets, one result per set in input
    /// order. A set that fails yields an empty slot.
    ///
    /// The default runs them one after another.
    fn filter_batch<'a>(
        &'a self,
        batches: Vec<Vec<Filter>>,
        max_rows: usize,
    ) -> BoxFuture<'a, Vec<Vec<Record>>> {
        Box::pin(async move {
            batches
                .iter()
                .enumerate()
                .map(|(slot, filters)| {
                    self.filter(filters, max_rows).unwrap_or_else(|e| {
                        warn!(slot, error = %e, "Filter in batch failed");
                        Vec::new()
                    })
                })
                .collect()
        })
    }

    fn count(&self, filters: &[Filter], group_by: Option<&str>) -> Result<CountSummary> {
        let rows = self.filter(filters, usize::MAX)?;
        Ok(CountSummary::from_records(&rows, group_by))
    }

    /// Distinct non-null text values of `field`, sorted.
    fn distinct_values(&self, field: &str) -> Result<Vec<String>> {
        let values: BTreeSet<String> = self
            .records()?
            .iter()
            .filter_map(|r| r.get_text(field))
            .collect();
        Ok(values.into_iter().collect())
    }
}
