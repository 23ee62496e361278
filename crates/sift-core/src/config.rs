use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SiftError};

/// Top-level configuration for a sift search engine.
///
/// Each section corresponds to one crate of the workspace. Missing sections
/// and keys fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiftConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub combination: CombinationConfig,
    #[serde(default)]
    pub vector: VectorConfig,
}

impl SiftConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SiftConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the engine misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            return Err(SiftError::Config("pool.max_connections must be > 0".into()));
        }
        if self.pool.fetch_size == 0 {
            return Err(SiftError::Config("pool.fetch_size must be > 0".into()));
        }
        if self.pool.max_workers == 0 {
            return Err(SiftError::Config("pool.max_workers must be > 0".into()));
        }
        if self.pool.max_retries == 0 {
            return Err(SiftError::Config("pool.max_retries must be > 0".into()));
        }
        let w = self.combination.structured_weight;
        if !(0.0..=1.0).contains(&w) {
            return Err(SiftError::Config(format!(
                "combination.structured_weight must be within [0, 1], got {}",
                w
            )));
        }
        if !matches!(
            self.combination.strategy.to_ascii_lowercase().as_str(),
            "weighted" | "sequential" | "rank_boost" | "rankboost"
        ) {
            return Err(SiftError::Config(format!(
                "unknown combination strategy '{}'",
                self.combination.strategy
            )));
        }
        if !matches!(self.search.provider.as_str(), "memory" | "sqlite") {
            return Err(SiftError::Config(format!(
                "unknown provider '{}'",
                self.search.provider
            )));
        }
        if self.vector.embedding_dim == 0 {
            return Err(SiftError::Config("vector.embedding_dim must be > 0".into()));
        }
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Search orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Backing provider: "memory" or "sqlite".
    pub provider: String,
    /// Default result limit when the caller does not pass one.
    pub max_results: usize,
    /// Upper bound on rows pulled from a provider for a single structured pass.
    pub max_scan_rows: usize,
    /// Per-field multipliers for fallback text scoring. The `default` key
    /// applies to every field without its own entry.
    pub field_weights: BTreeMap<String, f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let field_weights = [
            ("name", 2.0),
            ("description", 1.5),
            ("status", 1.0),
            ("error_message", 1.0),
            ("default", 0.5),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            provider: "memory".to_string(),
            max_results: 10,
            max_scan_rows: 10_000,
            field_weights,
        }
    }
}

impl SearchConfig {
    /// Weight for a field, falling back to the `default` entry (0.5 if absent).
    pub fn weight_for(&self, field: &str) -> f64 {
        self.field_weights
            .get(field)
            .or_else(|| self.field_weights.get("default"))
            .copied()
            .unwrap_or(0.5)
    }
}

/// Connection pool and executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on simultaneously open connections.
    pub max_connections: usize,
    /// How long `acquire` waits before failing with `PoolExhausted`.
    pub acquire_timeout_ms: u64,
    /// Rows fetched per batch.
    pub fetch_size: usize,
    /// Attempts made for transient busy/locked failures.
    pub max_retries: u32,
    /// Base backoff between attempts; attempt `n` sleeps `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    /// Worker bound for `execute_many`.
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout_ms: 5_000,
            fetch_size: 1_000,
            max_retries: 3,
            retry_backoff_ms: 50,
            max_workers: 4,
        }
    }
}

/// Query result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Capacity in entries before least-recently-used eviction.
    pub max_entries: usize,
    /// Entry lifetime in seconds. `0` disables expiry.
    pub ttl_secs: u64,
    /// Results with more rows than this are never cached.
    pub max_cached_rows: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 128,
            ttl_secs: 300,
            max_cached_rows: 1_000,
        }
    }
}

/// Result combination settings for hybrid queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinationConfig {
    /// "weighted", "sequential" or "rank_boost".
    pub strategy: String,
    /// Weight of the structured side in the weighted strategy.
    pub structured_weight: f64,
    /// Additive boost for items found by both sides (rank_boost).
    pub boost: f64,
    /// Dedup key. Defaults to the mapping's id field.
    pub id_field: Option<String>,
}

impl Default for CombinationConfig {
    fn default() -> Self {
        Self {
            strategy: "weighted".to_string(),
            structured_weight: 0.5,
            boost: 0.25,
            id_field: None,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub embedding_dim: usize,
    /// Where the index is persisted. `None` keeps it in memory only.
    pub index_path: Option<PathBuf>,
    /// Ignore a persisted index and rebuild from provider records.
    pub rebuild: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 384,
            index_path: None,
            rebuild: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SiftConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.search.max_results, 10);
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.acquire_timeout_ms, 5_000);
        assert_eq!(config.pool.fetch_size, 1_000);
        assert_eq!(config.pool.max_retries, 3);
        assert_eq!(config.combination.strategy, "weighted");
        assert!((config.combination.structured_weight - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.vector.embedding_dim, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_field_weights_defaults() {
        let search = SearchConfig::default();
        assert_eq!(search.weight_for("name"), 2.0);
        assert_eq!(search.weight_for("description"), 1.5);
        assert_eq!(search.weight_for("status"), 1.0);
        assert_eq!(search.weight_for("error_message"), 1.0);
        assert_eq!(search.weight_for("owner"), 0.5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sift.toml");

        let mut config = SiftConfig::default();
        config.pool.max_connections = 8;
        config.combination.strategy = "rank_boost".to_string();
        config.save(&path).unwrap();

        let loaded = SiftConfig::load(&path).unwrap();
        assert_eq!(loaded.pool.max_connections, 8);
        assert_eq!(loaded.combination.strategy, "rank_boost");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[pool]
max_connections = 2

[combination]
structured_weight = 0.8
"#;
        let config: SiftConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pool.max_connections, 2);
        assert_eq!(config.pool.fetch_size, 1_000);
        assert!((config.combination.structured_weight - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.cache.max_entries, 128);
        assert_eq!(config.search.weight_for("name"), 2.0);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = SiftConfig::load_or_default(Path::new("/nonexistent/sift.toml"));
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[combination]\nstructured_weight = 1.5\n").unwrap();
        let err = SiftConfig::load(&path).unwrap_err();
        assert!(matches!(err, SiftError::Config(_)));
    }

    #[test]
    fn test_validate_unknown_strategy() {
        let mut config = SiftConfig::default();
        config.combination.strategy = "interleave".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_pool() {
        let mut config = SiftConfig::default();
        config.pool.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
