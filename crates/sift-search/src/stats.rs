//! Per-engine performance counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sift_query::QueryKind;

/// Counters owned by one [`SearchEngine`](crate::SearchEngine). They live as
/// long as the engine and are never shared between instances.
#[derive(Debug, Default)]
pub struct EngineStats {
    structured: AtomicU64,
    vector: AtomicU64,
    hybrid: AtomicU64,
    counting: AtomicU64,
    id_lookup_hits: AtomicU64,
    total_searches: AtomicU64,
    total_elapsed_us: AtomicU64,
    last_elapsed_us: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub structured: u64,
    pub vector: u64,
    pub hybrid: u64,
    pub counting: u64,
    pub id_lookup_hits: u64,
    pub total_searches: u64,
    pub total_elapsed_us: u64,
    pub last_elapsed_us: u64,
}

impl StatsSnapshot {
    pub fn average_elapsed_us(&self) -> u64 {
        if self.total_searches == 0 {
            0
        } else {
            self.total_elapsed_us / self.total_searches
        }
    }
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a search that went through classification.
    pub fn record(&self, kind: QueryKind, elapsed: Duration) {
        let counter = match kind {
            QueryKind::Structured => &self.structured,
            QueryKind::Vector => &self.vector,
            QueryKind::Hybrid => &self.hybrid,
            QueryKind::Counting => &self.counting,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.finish(elapsed);
    }

    /// Record a search answered by a direct id lookup.
    pub fn record_id_hit(&self, elapsed: Duration) {
        self.id_lookup_hits.fetch_add(1, Ordering::Relaxed);
        self.finish(elapsed);
    }

    fn finish(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_searches.fetch_add(1, Ordering::Relaxed);
        self.total_elapsed_us.fetch_add(micros, Ordering::Relaxed);
        self.last_elapsed_us.store(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            structured: self.structured.load(Ordering::Relaxed),
            vector: self.vector.load(Ordering::Relaxed),
            hybrid: self.hybrid.load(Ordering::Relaxed),
            counting: self.counting.load(Ordering::Relaxed),
            id_lookup_hits: self.id_lookup_hits.load(Ordering::Relaxed),
            total_searches: self.total_searches.load(Ordering::Relaxed),
            total_elapsed_us: self.total_elapsed_us.load(Ordering::Relaxed),
            last_elapsed_us: self.last_elapsed_us.load(Ordering::Relaxed),
        }
    }
}
