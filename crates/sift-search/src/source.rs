//! Provider construction driven by `search.provider`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use sift_core::config::SiftConfig;
use sift_core::error::{Result, SiftError};
use sift_core::provider::DataProvider;
use sift_core::types::{FieldMapping, Record};
use sift_storage::SqliteProvider;

use crate::memory::MemoryProvider;

/// Where records come from.
#[derive(Debug, Clone)]
pub enum ProviderSource {
    /// Records already in memory.
    Records {
        records: Vec<Record>,
        fields: Vec<String>,
        mapping: Option<FieldMapping>,
    },
    /// A table in a SQLite database file.
    Sqlite {
        path: PathBuf,
        table: String,
        mapping: Option<FieldMapping>,
    },
}

/// Open the provider kind named by `config.search.provider` over `source`.
///
/// A `memory` provider over a SQLite source loads the table once. A
/// `sqlite` provider needs a SQLite source.
pub fn open_provider(config: &SiftConfig, source: ProviderSource) -> Result<Arc<dyn DataProvider>> {
    match (config.search.provider.as_str(), source) {
        (
            "memory",
            ProviderSource::Records {
                records,
                fields,
                mapping,
            },
        ) => Ok(Arc::new(memory_provider(records, fields, mapping)?)),
        ("memory", ProviderSource::Sqlite { path, table, mapping }) => {
            let sqlite = SqliteProvider::open(&path, &table, mapping, config)?;
            let records = sqlite.records()?;
            info!(table = %table, records = records.len(), "Loaded SQLite table into memory");
            let provider = MemoryProvider::new(
                records,
                sqlite.fields().to_vec(),
                sqlite.mapping().clone(),
            )?;
            sqlite.executor().pool().shutdown();
            Ok(Arc::new(provider))
        }
        ("sqlite", ProviderSource::Sqlite { path, table, mapping }) => {
            Ok(Arc::new(SqliteProvider::open(&path, &table, mapping, config)?))
        }
        ("sqlite", ProviderSource::Records { .. }) => Err(SiftError::Config(
            "sqlite provider needs a database path and table".to_string(),
        )),
        (other, _) => Err(SiftError::Config(format!("unknown provider '{}'", other))),
    }
}

fn memory_provider(
    records: Vec<Record>,
    fields: Vec<String>,
    mapping: Option<FieldMapping>,
) -> Result<MemoryProvider> {
    match mapping {
        Some(mapping) => MemoryProvider::new(records, fields, mapping),
        None if fields.is_empty() => MemoryProvider::from_records(records),
        None => {
            let mapping = FieldMapping::infer(&fields, &records);
            MemoryProvider::new(records, fields, mapping)
        }
    }
}
