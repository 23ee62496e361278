//! Bounded pool of read-only SQLite connections.
//!
//! Connections are opened lazily up to `max_connections`. Callers that find
//! the pool saturated wait on a condition variable until a connection is
//! released or the acquire timeout elapses. The state lock is held only
//! while the idle queue and counters are updated, never while a
//! connection is opened or used.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use sift_core::config::PoolConfig;
use sift_core::error::{Result, SiftError};

const BUSY_TIMEOUT: Duration = Duration::from_millis(100);

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub checked_out: usize,
    /// Highest `checked_out` observed since the pool was created.
    pub peak_checked_out: usize,
    pub max_connections: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Connection>,
    open: usize,
    checked_out: usize,
    peak_checked_out: usize,
    closed: bool,
}

impl PoolState {
    fn check_out(&mut self) {
        self.checked_out += 1;
        self.peak_checked_out = self.peak_checked_out.max(self.checked_out);
    }
}

#[derive(Debug)]
struct PoolInner {
    path: PathBuf,
    max_connections: usize,
    acquire_timeout: Duration,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|e| SiftError::Storage(format!("Pool lock poisoned: {}", e)))
    }

    fn release(&self, conn: Connection, healthy: bool) {
        // Called from Drop, so a poisoned lock is recovered rather than reported.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.checked_out = state.checked_out.saturating_sub(1);
        if state.closed || !healthy || state.idle.len() >= self.max_connections {
            state.open = state.open.saturating_sub(1);
            drop(state);
            if let Err((_, e)) = conn.close() {
                debug!(error = %e, "Error closing pooled connection");
            }
        } else {
            state.idle.push(conn);
            drop(state);
        }
        self.available.notify_one();
    }
}

/// Thread-safe pool handle. Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool over an existing database file.
    ///
    /// No connection is opened until the first [`acquire`](Self::acquire).
    pub fn open(path: &Path, config: &PoolConfig) -> Result<Self> {
        if !path.exists() {
            return Err(SiftError::Storage(format!(
                "Database not found at {}",
                path.display()
            )));
        }
        if config.max_connections == 0 {
            return Err(SiftError::Config("pool.max_connections must be > 0".into()));
        }

        info!(
            path = %path.display(),
            max_connections = config.max_connections,
            "Connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                path: path.to_path_buf(),
                max_connections: config.max_connections,
                acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Take a connection, opening one if the pool is below capacity, or
    /// waiting up to the acquire timeout for one to be released.
    pub fn acquire(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.acquire_timeout;
        let mut state = inner.lock()?;

        loop {
            if state.closed {
                return Err(SiftError::Storage("Connection pool is shut down".into()));
            }

            if let Some(conn) = state.idle.pop() {
                state.check_out();
                return Ok(PooledConnection::new(conn, Arc::clone(inner)));
            }

            if state.open < inner.max_connections {
                state.open += 1;
                state.check_out();
                drop(state);

                return match open_connection(&inner.path) {
                    Ok(conn) => {
                        debug!(path = %inner.path.display(), "Opened pooled connection");
                        Ok(PooledConnection::new(conn, Arc::clone(inner)))
                    }
                    Err(e) => {
                        let mut state = inner.lock()?;
                        state.open -= 1;
                        state.checked_out -= 1;
                        drop(state);
                        inner.available.notify_one();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SiftError::PoolExhausted {
                    timeout_ms: inner.acquire_timeout.as_millis() as u64,
                });
            }

            let (guard, _) = inner
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|e| SiftError::Storage(format!("Pool lock poisoned: {}", e)))?;
            state = guard;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            checked_out: state.checked_out,
            peak_checked_out: state.peak_checked_out,
            max_connections: self.inner.max_connections,
        }
    }

    /// Close idle connections and refuse further acquisitions. Connections
    /// still checked out are closed as they are released.
    pub fn shutdown(&self) {
        let idle = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.closed = true;
            let idle: Vec<Connection> = state.idle.drain(..).collect();
            state.open = state.open.saturating_sub(idle.len());
            idle
        };
        let closed = idle.len();
        drop(idle);
        self.inner.available.notify_all();
        info!(closed, "Connection pool shut down");
    }
}

/// Open a read-only connection tuned for scans.
fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )
    .map_err(|e| SiftError::Storage(format!("Failed to open database: {}", e)))?;

    conn.execute_batch(
        "PRAGMA query_only = ON;
         PRAGMA cache_size = -16384;
         PRAGMA temp_store = MEMORY;
         PRAGMA mmap_size = 268435456;",
    )
    .map_err(|e| SiftError::Storage(format!("Failed to set pragmas: {}", e)))?;

    // Busy/locked is retried by the executor, so each attempt waits briefly.
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(|e| SiftError::Storage(format!("Failed to set busy timeout: {}", e)))?;

    Ok(conn)
}

/// A checked-out connection. Returned to the pool (or closed) on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    healthy: bool,
}

impl PooledConnection {
    fn new(conn: Connection, pool: Arc<PoolInner>) -> Self {
        Self {
            conn: Some(conn),
            pool,
            healthy: true,
        }
    }

    /// Close this connection on release instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.healthy = false;
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.healthy);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("healthy", &self.healthy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("pool.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
             INSERT INTO t (v) VALUES ('a'), ('b');",
        )
        .unwrap();
        path
    }

    fn config(max: usize, timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            max_connections: max,
            acquire_timeout_ms: timeout_ms,
            ..PoolConfig::default()
        }
    }

    #[test]
    fn test_missing_database() {
        let err = ConnectionPool::open(Path::new("/nonexistent/x.db"), &config(2, 100)).unwrap_err();
        assert!(matches!(err, SiftError::Storage(_)));
    }

    #[test]
    fn test_lazy_open_and_reuse() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(2, 100)).unwrap();
        assert_eq!(pool.stats().open, 0);

        {
            let conn = pool.acquire().unwrap();
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
            assert_eq!(n, 2);
            assert_eq!(pool.stats().checked_out, 1);
        }

        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.checked_out, 0);

        let _again = pool.acquire().unwrap();
        assert_eq!(pool.stats().open, 1);
    }

    #[test]
    fn test_connections_are_read_only() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(1, 100)).unwrap();
        let conn = pool.acquire().unwrap();
        assert!(conn.execute("INSERT INTO t (v) VALUES ('c')", []).is_err());
    }

    #[test]
    fn test_exhaustion_times_out() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(1, 50)).unwrap();
        let _held = pool.acquire().unwrap();

        let start = Instant::now();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, SiftError::PoolExhausted { timeout_ms: 50 }));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_waiter_gets_released_connection() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(1, 2_000)).unwrap();
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(30));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_never_exceeds_max_connections() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(3, 5_000)).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let conn = pool.acquire().unwrap();
                    let stats = pool.stats();
                    assert!(stats.checked_out <= 3);
                    assert!(stats.open <= 3);
                    let _: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
                    std::thread::sleep(Duration::from_millis(10));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = pool.stats();
        assert!(stats.peak_checked_out <= 3);
        assert!(stats.peak_checked_out >= 1);
        assert_eq!(stats.checked_out, 0);
        assert!(stats.open <= 3);
    }

    #[test]
    fn test_broken_connection_is_closed() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(2, 100)).unwrap();
        {
            let mut conn = pool.acquire().unwrap();
            conn.mark_broken();
        }
        let stats = pool.stats();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_shutdown_refuses_acquire() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(2, 100)).unwrap();
        drop(pool.acquire().unwrap());
        assert_eq!(pool.stats().idle, 1);

        pool.shutdown();
        assert_eq!(pool.stats().open, 0);
        assert!(pool.acquire().is_err());
    }

    #[test]
    fn test_release_after_shutdown_closes() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&make_db(&dir), &config(2, 100)).unwrap();
        let held = pool.acquire().unwrap();
        pool.shutdown();
        drop(held);
        let stats = pool.stats();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.idle, 0);
    }
}
