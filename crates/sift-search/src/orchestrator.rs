//! Search orchestrator.
//!
//! `SearchEngine` owns a provider, an embedding service and a vector index.
//! Each query goes through id lookup, parsing and classification, then is
//! dispatched to the structured, vector, hybrid or counting path.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use sift_core::config::SiftConfig;
use sift_core::error::{Result, SiftError};
use sift_core::filter::Filter;
use sift_core::provider::{CountSummary, DataProvider};
use sift_core::types::{CanonicalField, FieldMapping, MatchType, Origin, Record, SearchResult};
use sift_query::{
    classify, detect_counting, detect_id_lookup, CountingQuery, ParsedQuery, QueryKind,
    QueryParser, TemporalFilter,
};
use sift_vector::embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding};
use sift_vector::index::VectorIndex;

use crate::combine::{combine, sort_desc, CombineStrategy};
use crate::scoring::TextScorer;
use crate::stats::{EngineStats, StatsSnapshot};

/// Vector candidates fetched per requested result.
const CANDIDATE_FACTOR: usize = 3;

/// How a query would be handled, without running it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub query: String,
    pub classification: QueryKind,
    pub filters: Vec<Filter>,
    pub temporal: Vec<TemporalFilter>,
    pub free_text: String,
    pub keywords: Vec<String>,
    pub count_target: Option<String>,
    pub group_by: Option<String>,
    pub id_lookup: Option<String>,
    pub strategy: &'static str,
}

/// Hybrid search engine over one data provider.
///
/// Uses dynamic dispatch (`Box<dyn DynEmbeddingService>`) so callers can
/// plug in a real encoder while tests use [`HashEmbedding`].
pub struct SearchEngine {
    provider: Arc<dyn DataProvider>,
    embedder: Box<dyn DynEmbeddingService>,
    index: Arc<VectorIndex>,
    parser: QueryParser,
    config: SiftConfig,
    strategy: CombineStrategy,
    id_field: String,
    stats: EngineStats,
}

impl SearchEngine {
    /// Build an engine and populate its vector index.
    pub async fn build(
        provider: Arc<dyn DataProvider>,
        embedder: impl EmbeddingService + 'static,
        config: SiftConfig,
    ) -> Result<Self> {
        Self::build_dyn(provider, Box::new(embedder), config).await
    }

    /// Build an engine using the deterministic hash embedding sized by
    /// `config.vector.embedding_dim`.
    pub async fn with_hash_embedding(
        provider: Arc<dyn DataProvider>,
        config: SiftConfig,
    ) -> Result<Self> {
        let embedder = HashEmbedding::new(config.vector.embedding_dim);
        Self::build(provider, embedder, config).await
    }

    /// Build an engine from a pre-boxed embedding service.
    ///
    /// When `vector.index_path` is set and `vector.rebuild` is false, a
    /// saved index is loaded; a missing or unreadable file triggers a
    /// rebuild instead.
    pub async fn build_dyn(
        provider: Arc<dyn DataProvider>,
        embedder: Box<dyn DynEmbeddingService>,
        config: SiftConfig,
    ) -> Result<Self> {
        config.validate()?;
        let strategy = CombineStrategy::from_config(&config.combination)?;

        let id_field = config
            .combination
            .id_field
            .clone()
            .or_else(|| provider.mapping().id_field().map(str::to_string))
            .ok_or_else(|| {
                SiftError::InvalidMapping(format!(
                    "provider '{}' has no id field mapped",
                    provider.name()
                ))
            })?;

        let parser = QueryParser::new(provider.fields().to_vec(), provider.mapping().clone());
        let index = Arc::new(VectorIndex::new(embedder.dimensions()));

        let engine = Self {
            provider,
            embedder,
            index,
            parser,
            config,
            strategy,
            id_field,
            stats: EngineStats::new(),
        };
        engine.load_or_build_index().await?;

        info!(
            provider = engine.provider.name(),
            strategy = engine.strategy.name(),
            vectors = engine.index.len(),
            "Search engine ready"
        );
        Ok(engine)
    }

    async fn load_or_build_index(&self) -> Result<()> {
        if let Some(path) = &self.config.vector.index_path {
            if !self.config.vector.rebuild {
                match self.index.try_load(path) {
                    Ok(()) => return Ok(()),
                    Err(e) => warn!(error = %e, "Rebuilding vector index"),
                }
            }
        }
        self.rebuild_index().await.map(|_| ())
    }

    /// Re-embed every record. Records without an id or without any text
    /// are skipped. Returns the number of vectors indexed.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let records = self.provider.records()?;
        let mapping = self.provider.mapping();
        self.index.clear()?;

        let mut indexed = 0usize;
        for record in records {
            let Some(id) = record.get_text(&self.id_field) else {
                continue;
            };
            let text = record_text(&record, mapping);
            if text.trim().is_empty() {
                continue;
            }
            let embedding = self.embedder.embed_boxed(&text).await?;
            self.index.add(id, record.into_value(), embedding)?;
            indexed += 1;
        }

        if let Some(path) = &self.config.vector.index_path {
            self.index.save(path)?;
        }
        info!(indexed, "Vector index built");
        Ok(indexed)
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Search with `search.max_results` as the limit.
    pub async fn search_default(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.search(query, self.config.search.max_results).await
    }

    /// Run `query` and return at most `limit` results, best first.
    ///
    /// Under the sequential strategy the limit counts real results only
    /// and the order is structured group, separator, vector group.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.run(query, limit, None).await
    }

    /// Run several queries, one result list per query in input order.
    ///
    /// The structured fetches of all structured and hybrid queries go to the
    /// provider as one batch; the rest of each query runs as in [`search`].
    ///
    /// [`search`]: SearchEngine::search
    pub async fn search_many(
        &self,
        queries: &[&str],
        limit: usize,
    ) -> Result<Vec<Vec<SearchResult>>> {
        let plans: Vec<Option<Vec<Filter>>> =
            queries.iter().map(|q| self.batch_filters(q)).collect();
        let batch: Vec<Vec<Filter>> = plans.iter().flatten().cloned().collect();
        debug!(queries = queries.len(), batched = batch.len(), "Batched structured fetch");

        let mut fetched = self
            .provider
            .filter_batch(batch, self.config.search.max_scan_rows)
            .await
            .into_iter();

        let mut out = Vec::with_capacity(queries.len());
        for (query, plan) in queries.iter().zip(plans) {
            let prefetched = plan.and_then(|filters| fetched.next().map(|rows| (filters, rows)));
            out.push(self.run(query, limit, prefetched).await?);
        }
        Ok(out)
    }

    /// Filters worth fetching ahead for `query`: structured or hybrid, not
    /// an id lookup, with at least one usable filter.
    fn batch_filters(&self, query: &str) -> Option<Vec<Filter>> {
        let query = query.trim();
        if detect_id_lookup(query).is_some() {
            return None;
        }
        let parsed = self.parser.parse(query);
        if !matches!(classify(&parsed), QueryKind::Structured | QueryKind::Hybrid) {
            return None;
        }
        let filters = self.lower_filters(&parsed);
        (!filters.is_empty()).then_some(filters)
    }

    async fn run(
        &self,
        query: &str,
        limit: usize,
        prefetched: Option<(Vec<Filter>, Vec<Record>)>,
    ) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let query = query.trim();

        if let Some(id) = detect_id_lookup(query) {
            if let Some(record) = self.provider.get_by_id(&id)? {
                self.stats.record_id_hit(started.elapsed());
                debug!(id = %id, "Direct id lookup hit");
                let hit = SearchResult::new(record, 1.0, MatchType::ExactId, Origin::Direct);
                return Ok(finish(vec![hit], limit, false));
            }
            debug!(id = %id, "Direct id lookup missed");
        }

        let parsed = self.parser.parse(query);
        let kind = classify(&parsed);

        let results = match kind {
            QueryKind::Counting => {
                let summary = self.count(query)?;
                finish(vec![count_result(summary)], limit, false)
            }
            QueryKind::Structured => {
                finish(self.structured_search(&parsed, prefetched)?, limit, false)
            }
            QueryKind::Vector => finish(self.vector_search(&parsed, limit).await?, limit, false),
            QueryKind::Hybrid => {
                let structured = self.structured_search(&parsed, prefetched)?;
                let vector = self.vector_search(&parsed, limit).await?;
                let merged = combine(&structured, &vector, self.strategy, &self.id_field);
                finish(merged, limit, self.strategy.preserves_order())
            }
        };

        let elapsed = started.elapsed();
        self.stats.record(kind, elapsed);
        debug!(
            kind = kind.as_str(),
            results = results.len(),
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "Search complete"
        );
        Ok(results)
    }

    /// Filtered rows scored `1 + text score` over the unfiltered fields.
    /// Without any usable filter this degrades to plain text matching.
    /// `prefetched` carries filters already lowered and the rows they matched.
    fn structured_search(
        &self,
        parsed: &ParsedQuery,
        prefetched: Option<(Vec<Filter>, Vec<Record>)>,
    ) -> Result<Vec<SearchResult>> {
        let keywords = parsed.keywords();

        let (filters, rows) = match prefetched {
            Some(fetched) => fetched,
            None => {
                let filters = self.lower_filters(parsed);
                if filters.is_empty() {
                    debug!("No usable filters, falling back to text matching");
                    return self.text_matches(&parsed.free_text, &keywords, Origin::Structured);
                }
                let rows = self
                    .provider
                    .filter(&filters, self.config.search.max_scan_rows)?;
                (filters, rows)
            }
        };
        let scorer = self.scorer();
        let skip: HashSet<&str> = filters.iter().map(|f| f.field.as_str()).collect();

        let mut results: Vec<SearchResult> = rows
            .into_iter()
            .map(|record| {
                let score = 1.0 + scorer.score(&record, &parsed.free_text, &keywords, &skip);
                SearchResult::new(record, score, MatchType::Structured, Origin::Structured)
            })
            .collect();
        sort_desc(&mut results);
        Ok(results)
    }

    async fn vector_search(&self, parsed: &ParsedQuery, limit: usize) -> Result<Vec<SearchResult>> {
        let text = parsed.free_text.trim();
        if text.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if self.index.is_empty() {
            debug!("Vector index empty, falling back to text matching");
            return self.text_matches(text, &parsed.keywords(), Origin::Vector);
        }

        let embedding = self.embedder.embed_boxed(text).await?;
        let hits = self
            .index
            .search(&embedding, limit.saturating_mul(CANDIDATE_FACTOR))?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = match Record::from_value(hit.payload) {
                Some(record) => record,
                None => match self.provider.get_by_id(&hit.id)? {
                    Some(record) => record,
                    None => continue,
                },
            };
            results.push(SearchResult::new(
                record,
                hit.score,
                MatchType::Semantic,
                Origin::Vector,
            ));
        }
        Ok(results)
    }

    /// Every record with a positive text score.
    fn text_matches(
        &self,
        free_text: &str,
        keywords: &[String],
        origin: Origin,
    ) -> Result<Vec<SearchResult>> {
        if free_text.trim().is_empty() && keywords.is_empty() {
            return Ok(Vec::new());
        }
        let scorer = self.scorer();
        let skip = HashSet::new();

        let mut results: Vec<SearchResult> = self
            .provider
            .records()?
            .into_iter()
            .filter_map(|record| {
                let score = scorer.score(&record, free_text, keywords, &skip);
                (score > 0.0).then(|| SearchResult::new(record, score, MatchType::TextMatch, origin))
            })
            .collect();
        sort_desc(&mut results);
        Ok(results)
    }

    // =========================================================================
    // Counting
    // =========================================================================

    /// Answer a counting question.
    ///
    /// Parsed filters and temporal constraints restrict the rows. A keyword
    /// naming a known status value becomes a status filter. Remaining
    /// keywords only narrow the count when they occur in at least one
    /// filtered row; the counted noun itself is ignored once other
    /// constraints exist.
    pub fn count(&self, query: &str) -> Result<CountSummary> {
        let counting = detect_counting(query).unwrap_or_else(|| CountingQuery {
            target: None,
            group_by: None,
            cleaned: query.trim().to_string(),
        });
        let parsed = self.parser.parse(&counting.cleaned);
        let mut filters = self.lower_filters(&parsed);
        let mut keywords = parsed.keywords();

        if let Some(status_field) = self.provider.mapping().status_field() {
            if !filters.iter().any(|f| f.field == status_field) {
                let statuses = self.provider.distinct_values(status_field)?;
                if let Some(pos) = keywords
                    .iter()
                    .position(|k| statuses.iter().any(|s| s.eq_ignore_ascii_case(k)))
                {
                    let status = keywords.remove(pos);
                    debug!(status = %status, "Inferred status filter");
                    filters.push(Filter::eq_text(status_field, status));
                }
            }
        }

        if !filters.is_empty() {
            if let Some(target) = &counting.target {
                keywords.retain(|k| k != target);
            }
        }

        let group_by = counting
            .group_by
            .as_deref()
            .map(|g| self.parser.resolve_field(g).unwrap_or_else(|| g.to_string()));

        let mut summary = if keywords.is_empty() {
            self.provider.count(&filters, group_by.as_deref())?
        } else {
            let rows = self
                .provider
                .filter(&filters, self.config.search.max_scan_rows)?;
            let scorer = self.scorer();
            let informative: Vec<&String> = keywords
                .iter()
                .filter(|k| rows.iter().any(|r| scorer.mentions(r, k)))
                .collect();

            if informative.is_empty() {
                self.provider.count(&filters, group_by.as_deref())?
            } else {
                let kept: Vec<Record> = rows
                    .into_iter()
                    .filter(|r| informative.iter().all(|k| scorer.mentions(r, k)))
                    .collect();
                CountSummary::from_records(&kept, group_by.as_deref())
            }
        };
        summary.target = counting.target;
        Ok(summary)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Describe how `query` would be handled.
    pub fn explain(&self, query: &str) -> Explanation {
        let query = query.trim();
        let parsed = self.parser.parse(query);
        let classification = classify(&parsed);
        let keywords = parsed.keywords();
        let counting = if classification == QueryKind::Counting {
            detect_counting(query)
        } else {
            None
        };
        let (count_target, group_by) = match counting {
            Some(c) => (c.target, c.group_by),
            None => (None, None),
        };

        Explanation {
            query: query.to_string(),
            classification,
            filters: parsed.filters,
            temporal: parsed.temporal,
            free_text: parsed.free_text,
            keywords,
            count_target,
            group_by,
            id_lookup: detect_id_lookup(query),
            strategy: self.strategy.name(),
        }
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Record>> {
        self.provider.get_by_id(id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn strategy(&self) -> CombineStrategy {
        self.strategy
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    fn scorer(&self) -> TextScorer<'_> {
        TextScorer::new(&self.config.search, self.provider.mapping())
    }

    /// Parsed filters plus temporal constraints lowered against now.
    fn lower_filters(&self, parsed: &ParsedQuery) -> Vec<Filter> {
        let now = Utc::now();
        let mapping = self.provider.mapping();
        let mut filters = parsed.filters.clone();
        for temporal in &parsed.temporal {
            match temporal.to_filter(mapping, now) {
                Some(filter) => filters.push(filter),
                None => debug!("No timestamp field mapped, ignoring time constraint"),
            }
        }
        filters
    }
}

/// Text embedded for a record: its name, status and text fields, else
/// every string value.
fn record_text(record: &Record, mapping: &FieldMapping) -> String {
    let mut parts: Vec<String> = [CanonicalField::Name, CanonicalField::Status, CanonicalField::Text]
        .into_iter()
        .flat_map(|role| mapping.fields_for(role))
        .filter_map(|field| record.get_text(field))
        .collect();
    if parts.is_empty() {
        parts = record
            .iter()
            .filter(|(field, _)| !field.starts_with('_'))
            .filter_map(|(_, value)| value.as_str().map(str::to_string))
            .collect();
    }
    parts.join(" ")
}

fn count_result(summary: CountSummary) -> SearchResult {
    let groups: Map<String, Value> = summary
        .groups
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(*v)))
        .collect();
    let record = Record::new()
        .with("count", summary.count)
        .with("target", summary.target)
        .with("group_by", summary.group_by)
        .with("groups", Value::Object(groups));
    SearchResult::new(record, 1.0, MatchType::Count, Origin::Aggregate)
}

/// Order and cut the final list. Order-preserving output keeps its
/// separators but only counts real results against `limit`, and never ends
/// on a separator.
fn finish(mut results: Vec<SearchResult>, limit: usize, preserve_order: bool) -> Vec<SearchResult> {
    if !preserve_order {
        sort_desc(&mut results);
        results.truncate(limit);
        return results;
    }

    let mut out = Vec::with_capacity(results.len().min(limit + 1));
    let mut taken = 0usize;
    for result in results {
        if result.is_separator() {
            out.push(result);
            continue;
        }
        if taken == limit {
            break;
        }
        taken += 1;
        out.push(result);
    }
    while out.last().is_some_and(SearchResult::is_separator) {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use chrono::Duration;
    use serde_json::json;
    use sift_core::types::format_timestamp;

    fn jobs() -> Vec<Record> {
        let now = Utc::now();
        let ago = |days: i64| format_timestamp(&(now - Duration::days(days)));
        [
            json!({"job_id": "J1", "job_name": "warehouse backup", "status": "failed", "duration_minutes": 45, "created_at": ago(1)}),
            json!({"job_id": "J2", "job_name": "etl orders", "status": "success", "duration_minutes": 12, "created_at": ago(3)}),
            json!({"job_id": "J3", "job_name": "report builder", "status": "running", "duration_minutes": 31, "created_at": ago(20)}),
            json!({"job_id": "J4", "job_name": "log rotation", "status": "running", "duration_minutes": 2, "created_at": ago(40)}),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect()
    }

    async fn engine() -> SearchEngine {
        let provider = MemoryProvider::from_records(jobs()).unwrap();
        SearchEngine::with_hash_embedding(Arc::new(provider), SiftConfig::default())
            .await
            .unwrap()
    }

    fn ids(results: &[SearchResult]) -> Vec<String> {
        results
            .iter()
            .filter_map(|r| r.record.get_text("job_id"))
            .collect()
    }

    #[tokio::test]
    async fn test_build_indexes_records() {
        let engine = engine().await;
        assert_eq!(engine.index().len(), 4);
        assert_eq!(engine.strategy().name(), "weighted");
    }

    #[tokio::test]
    async fn test_id_lookup() {
        let engine = engine().await;
        let results = engine.search("id:J3", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_type, MatchType::ExactId);
        assert_eq!(results[0].origin, Origin::Direct);
        assert_eq!(engine.stats().id_lookup_hits, 1);
    }

    #[tokio::test]
    async fn test_structured_status() {
        let engine = engine().await;
        let results = engine.search("status:running", 10).await.unwrap();
        assert_eq!(ids(&results).len(), 2);
        assert!(results.iter().all(|r| r.match_type == MatchType::Structured));
        assert!(results.iter().all(|r| r.score >= 1.0));
    }

    #[tokio::test]
    async fn test_numeric_comparison() {
        let engine = engine().await;
        let results = engine.search("duration_minutes>30", 10).await.unwrap();
        let mut found = ids(&results);
        found.sort();
        assert_eq!(found, vec!["J1", "J3"]);
    }

    #[tokio::test]
    async fn test_search_many_matches_single_searches() {
        let engine = engine().await;
        let queries = ["status:running", "id:J3", "duration_minutes>30", "how many jobs are running"];
        let batched = engine.search_many(&queries, 10).await.unwrap();
        assert_eq!(batched.len(), queries.len());
        for (query, results) in queries.iter().zip(&batched) {
            let single = engine.search(query, 10).await.unwrap();
            assert_eq!(ids(results), ids(&single), "query {}", query);
        }
        assert_eq!(batched[1][0].match_type, MatchType::ExactId);
        assert_eq!(batched[3][0].match_type, MatchType::Count);
    }

    #[tokio::test]
    async fn test_count_with_inferred_status() {
        let engine = engine().await;
        let summary = engine.count("how many jobs are running").unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.target.as_deref(), Some("jobs"));

        let results = engine.search("how many jobs are running", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_type, MatchType::Count);
        assert_eq!(results[0].record.get_f64("count"), Some(2.0));
    }

    #[tokio::test]
    async fn test_count_grouped() {
        let engine = engine().await;
        let summary = engine.count("count jobs grouped by status").unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.group_by.as_deref(), Some("status"));
        assert_eq!(summary.groups.get("running"), Some(&2));
    }

    #[tokio::test]
    async fn test_explain() {
        let engine = engine().await;
        let explanation = engine.explain("status:failed jobs similar to backup");
        assert_eq!(explanation.classification, QueryKind::Hybrid);
        assert_eq!(explanation.filters.len(), 1);
        assert!(explanation.id_lookup.is_none());
    }

    /// Provider with no roles mapped.
    struct Unmapped {
        fields: Vec<String>,
        mapping: FieldMapping,
    }

    impl DataProvider for Unmapped {
        fn name(&self) -> &str {
            "unmapped"
        }
        fn fields(&self) -> &[String] {
            &self.fields
        }
        fn mapping(&self) -> &FieldMapping {
            &self.mapping
        }
        fn records(&self) -> Result<Vec<Record>> {
            Ok(vec![Record::new().with("label", "x")])
        }
        fn get_by_id(&self, _id: &str) -> Result<Option<Record>> {
            Ok(None)
        }
        fn filter(&self, _filters: &[Filter], _max_rows: usize) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_missing_id_field_rejected() {
        let provider = || {
            Arc::new(Unmapped {
                fields: vec!["label".to_string()],
                mapping: FieldMapping::new(),
            })
        };
        let err = SearchEngine::with_hash_embedding(provider(), SiftConfig::default()).await;
        assert!(matches!(err, Err(SiftError::InvalidMapping(_))));

        let mut config = SiftConfig::default();
        config.combination.id_field = Some("label".to_string());
        let engine = SearchEngine::with_hash_embedding(provider(), config).await.unwrap();
        assert_eq!(engine.index().len(), 1);
    }

    #[test]
    fn test_finish_sequential_limit() {
        let r = |id: &str, s: f64| {
            SearchResult::new(Record::new().with("job_id", id), s, MatchType::Structured, Origin::Structured)
        };
        let list = vec![r("a", 3.0), r("b", 2.0), SearchResult::separator(), r("c", 0.9)];

        let out = finish(list.clone(), 2, true);
        assert_eq!(out.len(), 2);
        assert!(!out.last().unwrap().is_separator());

        let out = finish(list.clone(), 3, true);
        assert_eq!(out.len(), 4);
        assert!(out[2].is_separator());

        let out = finish(list, 10, false);
        assert_eq!(out[0].record.get_text("job_id").as_deref(), Some("a"));
        assert!(out.last().unwrap().is_separator());
    }

    #[test]
    fn test_record_text_prefers_mapped_fields() {
        let mapping = FieldMapping::new().with_role(CanonicalField::Name, ["job_name"]);
        let record = Record::new().with("job_name", "nightly").with("owner", "ops");
        assert_eq!(record_text(&record, &mapping), "nightly");
        assert_eq!(record_text(&record, &FieldMapping::new()), "nightly ops");
    }
}
