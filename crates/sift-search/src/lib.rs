//! Hybrid search over structured records.
//!
//! Ties the query parser, data providers and vector index together:
//! result combination strategies, an in-memory provider, fallback text
//! scoring, per-engine statistics and the search orchestrator.

pub mod combine;
pub mod memory;
pub mod orchestrator;
pub mod scoring;
pub mod source;
pub mod stats;

pub use combine::{combine, CombineStrategy};
pub use memory::MemoryProvider;
pub use orchestrator::{Explanation, SearchEngine};
pub use scoring::TextScorer;
pub use source::{open_provider, ProviderSource};
pub use stats::{EngineStats, StatsSnapshot};
