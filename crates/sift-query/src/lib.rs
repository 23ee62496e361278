//! Query understanding for sift.
//!
//! Parses natural-language queries into typed filters, relative-time
//! constraints and free text, and classifies them into a search path.

pub mod classify;
pub mod parser;
pub mod temporal;

pub use classify::{classify, detect_counting, detect_id_lookup, CountingQuery, QueryKind};
pub use parser::{extract_keywords, ParsedQuery, QueryParser};
pub use temporal::{extract_temporal, TemporalFilter};
