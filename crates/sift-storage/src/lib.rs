//! SQLite row-store access for sift.
//!
//! A bounded pool of read-only connections, a retrying and caching query
//! executor on top of it, and a [`SqliteProvider`] that compiles structured
//! filters to parameterised SQL.

pub mod cache;
pub mod executor;
pub mod pool;
pub mod provider;

pub use cache::{CacheStats, QueryCache};
pub use executor::{ensure_read_only, QueryExecutor, QueryResult, QuerySpec, RowStream, SqlValue};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use provider::SqliteProvider;
