//! Read-only query execution on top of the connection pool.
//!
//! [`QueryExecutor`] accepts only `SELECT`/`WITH` statements, binds
//! parameters, fetches rows in batches, retries transient busy/locked
//! failures with linear backoff, and caches small results keyed by
//! statement text and parameters.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use sift_core::config::{CacheConfig, PoolConfig};
use sift_core::error::{Result, SiftError};
use sift_core::types::Record;

use crate::cache::{CacheStats, QueryCache};
use crate::pool::{ConnectionPool, PooledConnection};

pub use rusqlite::types::Value as SqlValue;

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    pub elapsed: Duration,
    pub from_cache: bool,
}

impl QueryResult {
    /// Placeholder for a failed slot in [`QueryExecutor::execute_many`].
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One statement for [`QueryExecutor::execute_many`].
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub max_rows: usize,
}

impl QuerySpec {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>, max_rows: usize) -> Self {
        Self {
            sql: sql.into(),
            params,
            max_rows,
        }
    }
}

// =============================================================================
// Retry policy
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Run `op`, retrying busy/locked failures. On failure returns the
    /// number of attempts made with the last error.
    fn run<T>(
        &self,
        mut op: impl FnMut() -> rusqlite::Result<T>,
    ) -> std::result::Result<T, (u32, rusqlite::Error)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < self.max_attempts => {
                    debug!(attempt, error = %e, "Transient SQLite error, retrying");
                    std::thread::sleep(self.backoff * attempt);
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }
}

fn sqlite_code(err: &rusqlite::Error) -> Option<ErrorCode> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
        _ => None,
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        sqlite_code(err),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_broken(err: &rusqlite::Error) -> bool {
    matches!(
        sqlite_code(err),
        Some(
            ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::CannotOpen
        )
    )
}

fn query_failed(attempts: u32, err: rusqlite::Error) -> SiftError {
    SiftError::QueryFailed {
        attempts,
        source: Box::new(err),
    }
}

// =============================================================================
// Statement helpers
// =============================================================================

/// Reject anything but a read-only statement, before touching the database.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let keyword = leading_keyword(sql);
    if keyword.eq_ignore_ascii_case("select") || keyword.eq_ignore_ascii_case("with") {
        Ok(())
    } else {
        Err(SiftError::InvalidQueryKind(if keyword.is_empty() {
            "empty statement".to_string()
        } else {
            keyword.to_uppercase()
        }))
    }
}

/// First keyword of `sql`, skipping whitespace, comments and parentheses.
fn leading_keyword(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map(|i| &after[i + 1..]).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map(|i| &after[i + 2..]).unwrap_or("");
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    &rest[..end]
}

/// `sql` cut after its last significant character, dropping trailing
/// comments, whitespace and semicolons.
fn statement_body(sql: &str) -> &str {
    let bytes = sql.as_bytes();
    let mut end = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = sql[i..].find('\n').map_or(bytes.len(), |n| i + n);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..].find("*/").map_or(bytes.len(), |n| i + n + 4);
                continue;
            }
            quote @ (b'\'' | b'"') => {
                i = sql[i + 1..]
                    .find(quote as char)
                    .map_or(bytes.len(), |n| i + n + 2);
                end = i;
                continue;
            }
            b';' => {}
            b if b.is_ascii_whitespace() => {}
            _ => end = i + 1,
        }
        i += 1;
    }
    &sql[..end]
}

fn cache_key(sql: &str, params: &[SqlValue], max_rows: usize) -> String {
    format!("{}\u{1f}{:?}\u{1f}{}", sql, params, max_rows)
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn row_to_record(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (i, name) in columns.iter().enumerate() {
        record.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
    }
    Ok(record)
}

/// Run one statement, pulling at most `max_rows` rows in batches of
/// `fetch_size` and yielding the thread between batches.
fn fetch(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    max_rows: usize,
    fetch_size: usize,
) -> rusqlite::Result<QueryResult> {
    let started = Instant::now();
    let mut stmt = conn.prepare_cached(sql)?;
    if !stmt.readonly() {
        return Err(rusqlite::Error::InvalidQuery);
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    let mut in_batch = 0usize;
    while out.len() < max_rows {
        let Some(row) = rows.next()? else {
            break;
        };
        out.push(row_to_record(row, &columns)?);
        in_batch += 1;
        if in_batch == fetch_size {
            in_batch = 0;
            std::thread::yield_now();
        }
    }

    Ok(QueryResult {
        columns,
        rows: out,
        elapsed: started.elapsed(),
        from_cache: false,
    })
}

// =============================================================================
// QueryExecutor
// =============================================================================

pub struct QueryExecutor {
    pool: ConnectionPool,
    cache: Option<Mutex<QueryCache<QueryResult>>>,
    max_cached_rows: usize,
    fetch_size: usize,
    max_workers: usize,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(pool: ConnectionPool, pool_config: &PoolConfig, cache_config: &CacheConfig) -> Self {
        let cache = cache_config.enabled.then(|| {
            Mutex::new(QueryCache::new(
                cache_config.max_entries,
                Some(Duration::from_secs(cache_config.ttl_secs)),
            ))
        });
        Self {
            pool,
            cache,
            max_cached_rows: cache_config.max_cached_rows,
            fetch_size: pool_config.fetch_size.max(1),
            max_workers: pool_config.max_workers.max(1),
            retry: RetryPolicy {
                max_attempts: pool_config.max_retries.max(1),
                backoff: Duration::from_millis(pool_config.retry_backoff_ms),
            },
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache
            .as_ref()
            .map(|c| c.lock().map(|c| c.stats()).unwrap_or_default())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Ok(mut cache) = cache.lock() {
                cache.clear();
            }
        }
    }

    /// Execute a read-only statement and return up to `max_rows` rows.
    ///
    /// Busy/locked failures are retried; any other failure, or running out
    /// of attempts, surfaces as [`SiftError::QueryFailed`].
    pub fn execute(&self, sql: &str, params: &[SqlValue], max_rows: usize) -> Result<QueryResult> {
        ensure_read_only(sql)?;

        let key = cache_key(sql, params, max_rows);
        if let Some(cache) = &self.cache {
            let mut cache = cache
                .lock()
                .map_err(|e| SiftError::Storage(format!("Cache lock poisoned: {}", e)))?;
            if let Some(mut hit) = cache.get(&key) {
                debug!(rows = hit.rows.len(), "Query cache hit");
                hit.from_cache = true;
                return Ok(hit);
            }
        }

        let mut conn = self.pool.acquire()?;
        let outcome = self
            .retry
            .run(|| fetch(&conn, sql, params, max_rows, self.fetch_size));

        let result = match outcome {
            Ok(result) => result,
            Err((attempts, e)) => {
                if is_broken(&e) {
                    conn.mark_broken();
                }
                return Err(query_failed(attempts, e));
            }
        };
        drop(conn);

        debug!(
            rows = result.rows.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Query executed"
        );

        if result.rows.len() <= self.max_cached_rows {
            if let Some(cache) = &self.cache {
                if let Ok(mut cache) = cache.lock() {
                    cache.put(key, result.clone());
                }
            }
        }

        Ok(result)
    }

    /// Execute several statements concurrently, bounded by `max_workers`.
    ///
    /// Results come back in submission order. A failed statement yields an
    /// empty result in its slot and does not affect the others.
    pub async fn execute_many(self: &Arc<Self>, queries: Vec<QuerySpec>) -> Vec<QueryResult> {
        let permits = Arc::new(Semaphore::new(self.max_workers));

        let handles: Vec<_> = queries
            .into_iter()
            .map(|spec| {
                let executor = Arc::clone(self);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return Err(SiftError::Storage(format!("Worker semaphore closed: {}", e)))
                        }
                    };
                    let job = tokio::task::spawn_blocking(move || {
                        executor.execute(&spec.sql, &spec.params, spec.max_rows)
                    });
                    match job.await {
                        Ok(result) => result,
                        Err(e) => Err(SiftError::Storage(format!("Query worker failed: {}", e))),
                    }
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (slot, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SiftError::Storage(format!("Query task failed: {}", e))),
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(slot, error = %e, "Query in batch failed");
                    results.push(QueryResult::empty());
                }
            }
        }
        results
    }

    /// Stream the rows of a read-only statement in `fetch_size` pages.
    ///
    /// The returned stream holds one pooled connection until it is
    /// exhausted or dropped. It is single-pass.
    pub fn execute_streaming(&self, sql: &str, params: &[SqlValue]) -> Result<RowStream> {
        ensure_read_only(sql)?;

        let conn = self.pool.acquire()?;
        let columns = {
            let stmt = conn
                .prepare_cached(sql)
                .map_err(|e| query_failed(1, e))?;
            if !stmt.readonly() {
                return Err(SiftError::InvalidQueryKind(leading_keyword(sql).to_uppercase()));
            }
            stmt.column_names().into_iter().map(String::from).collect()
        };

        Ok(RowStream {
            conn: Some(conn),
            paged_sql: format!(
                "SELECT * FROM (\n{}\n) LIMIT ? OFFSET ?",
                statement_body(sql)
            ),
            params: params.to_vec(),
            columns,
            buffer: VecDeque::new(),
            offset: 0,
            fetch_size: self.fetch_size,
            retry: self.retry,
            exhausted: false,
        })
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("pool", &self.pool.stats())
            .field("fetch_size", &self.fetch_size)
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

// =============================================================================
// RowStream
// =============================================================================

/// Lazily paged rows of one statement.
pub struct RowStream {
    conn: Option<PooledConnection>,
    paged_sql: String,
    params: Vec<SqlValue>,
    columns: Vec<String>,
    buffer: VecDeque<Record>,
    offset: usize,
    fetch_size: usize,
    retry: RetryPolicy,
    exhausted: bool,
}

impl RowStream {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows handed out so far plus those buffered.
    pub fn fetched(&self) -> usize {
        self.offset
    }

    fn fill(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_ref() else {
            self.exhausted = true;
            return Ok(());
        };

        let mut params = self.params.clone();
        params.push(SqlValue::Integer(self.fetch_size as i64));
        params.push(SqlValue::Integer(self.offset as i64));

        let columns = &self.columns;
        let sql = &self.paged_sql;
        let page = self.retry.run(|| {
            let mut stmt = conn.prepare_cached(sql)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut page = Vec::new();
            while let Some(row) = rows.next()? {
                page.push(row_to_record(row, columns)?);
            }
            Ok(page)
        });

        let page = page.map_err(|(attempts, e)| query_failed(attempts, e))?;
        let n = page.len();
        self.offset += n;
        self.buffer.extend(page);

        if n < self.fetch_size {
            self.exhausted = true;
            self.conn = None;
        }
        Ok(())
    }
}

impl Iterator for RowStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                self.conn = None;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("offset", &self.offset)
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
