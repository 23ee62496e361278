//! In-memory [`DataProvider`] over an ordered record set.

use std::collections::HashMap;

use tracing::info;

use sift_core::error::Result;
use sift_core::filter::{apply_filters, Filter};
use sift_core::provider::DataProvider;
use sift_core::types::{FieldMapping, Record};

/// Records held in memory, loaded once at construction.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    records: Vec<Record>,
    fields: Vec<String>,
    mapping: FieldMapping,
    by_id: HashMap<String, usize>,
}

impl MemoryProvider {
    /// Wrap `records`. An empty `fields` list is derived from the records in
    /// first-seen order. Fails when the mapped id field is missing or not
    /// unique.
    pub fn new(records: Vec<Record>, fields: Vec<String>, mapping: FieldMapping) -> Result<Self> {
        mapping.validate_unique_ids(&records)?;

        let fields = if fields.is_empty() {
            fields_of(&records)
        } else {
            fields
        };

        let by_id = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.id(&mapping).map(|id| (id, i)))
            .collect();

        info!(records = records.len(), fields = fields.len(), "Memory provider loaded");
        Ok(Self {
            records,
            fields,
            mapping,
            by_id,
        })
    }

    /// Wrap `records`, inferring fields and the mapping from the data.
    pub fn from_records(records: Vec<Record>) -> Result<Self> {
        let fields = fields_of(&records);
        let mapping = FieldMapping::infer(&fields, &records);
        Self::new(records, fields, mapping)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Field names across `records`, in first-seen order.
fn fields_of(records: &[Record]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for record in records {
        for (name, _) in record.iter() {
            if !fields.contains(name) {
                fields.push(name.clone());
            }
        }
    }
    fields
}

impl DataProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn records(&self) -> Result<Vec<Record>> {
        Ok(self.records.clone())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.by_id.get(id).map(|&i| self.records[i].clone()))
    }

    fn filter(&self, filters: &[Filter], max_rows: usize) -> Result<Vec<Record>> {
        let mut rows = apply_filters(self.records.clone(), filters, &self.mapping);
        rows.truncate(max_rows);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sift_core::error::SiftError;
    use sift_core::filter::{FilterOp, FilterValue};
    use sift_core::provider::UNGROUPED;

    fn records() -> Vec<Record> {
        [
            json!({"id": 1, "name": "backup", "status": "failed"}),
            json!({"id": 2, "name": "etl", "status": "success"}),
            json!({"id": 3, "name": "report", "status": "failed", "owner": "ana"}),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect()
    }

    #[test]
    fn test_from_records_infers_mapping() {
        let p = MemoryProvider::from_records(records()).unwrap();
        assert_eq!(p.fields(), ["id", "name", "status", "owner"]);
        assert_eq!(p.mapping().id_field(), Some("id"));
        assert_eq!(p.mapping().status_field(), Some("status"));
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut rows = records();
        rows.push(Record::from_value(json!({"id": 1, "name": "dup"})).unwrap());
        assert!(matches!(
            MemoryProvider::from_records(rows),
            Err(SiftError::InvalidMapping(_))
        ));
    }

    #[test]
    fn test_get_by_id() {
        let p = MemoryProvider::from_records(records()).unwrap();
        let r = p.get_by_id("2").unwrap().unwrap();
        assert_eq!(r.get_text("name").as_deref(), Some("etl"));
        assert!(p.get_by_id("9").unwrap().is_none());
    }

    #[test]
    fn test_filter_and_max_rows() {
        let p = MemoryProvider::from_records(records()).unwrap();
        let failed = [Filter::eq_text("status", "failed")];
        assert_eq!(p.filter(&failed, 10).unwrap().len(), 2);
        assert_eq!(p.filter(&failed, 1).unwrap().len(), 1);

        let gt = Filter::new("id", FilterOp::Gt, FilterValue::Number(1.0));
        assert_eq!(p.filter(&[gt], 10).unwrap().len(), 2);
    }

    #[test]
    fn test_default_count_and_distinct() {
        let p = MemoryProvider::from_records(records()).unwrap();
        let summary = p.count(&[], Some("owner")).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.groups.get("ana"), Some(&1));
        assert_eq!(summary.groups.get(UNGROUPED), Some(&2));

        assert_eq!(p.distinct_values("status").unwrap(), vec!["failed", "success"]);
    }

    #[tokio::test]
    async fn test_default_filter_batch_keeps_slot_order() {
        let p = MemoryProvider::from_records(records()).unwrap();
        let batches = vec![
            vec![Filter::eq_text("status", "success")],
            vec![Filter::eq_text("status", "failed")],
            vec![Filter::eq_text("owner", "ana")],
        ];
        let results = p.filter_batch(batches, 10).await;
        let names: Vec<Vec<String>> = results
            .iter()
            .map(|rows| rows.iter().filter_map(|r| r.get_text("name")).collect())
            .collect();
        assert_eq!(names, vec![vec!["etl"], vec!["backup", "report"], vec!["report"]]);
    }
}
