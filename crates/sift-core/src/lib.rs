//! Shared foundation for sift.
//!
//! Records and their field mapping, typed filters, the [`DataProvider`]
//! trait both backends implement, configuration, errors and logging setup.
//!
//! ```
//! use serde_json::json;
//! use sift_core::{apply_filters, FieldMapping, Filter, Record};
//!
//! let records: Vec<Record> = [
//!     json!({"id": "a", "status": "failed"}),
//!     json!({"id": "b", "status": "success"}),
//! ]
//! .into_iter()
//! .filter_map(Record::from_value)
//! .collect();
//! let fields = vec!["id".to_string(), "status".to_string()];
//! let mapping = FieldMapping::infer(&fields, &records);
//!
//! let failed = apply_filters(records, &[Filter::eq_text("status", "failed")], &mapping);
//! assert_eq!(failed.len(), 1);
//! assert_eq!(failed[0].get_text("id").as_deref(), Some("a"));
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod provider;
pub mod types;

pub use config::SiftConfig;
pub use error::{Result, SiftError};
pub use filter::{apply_filters, Filter, FilterOp, FilterValue, DAYS_AGO_FIELD, RECENT_FIELD};
pub use provider::{CountSummary, DataProvider};
pub use types::*;
