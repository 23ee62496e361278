use thiserror::Error;

/// Boxed underlying cause carried by [`SiftError::QueryFailed`].
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for the sift workspace.
///
/// Every crate returns this type directly so that `?` composes across the
/// parser, storage, vector and search layers without adapter enums.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SiftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid field mapping: {0}")]
    InvalidMapping(String),

    #[error("Only read-only queries are accepted: {0}")]
    InvalidQueryKind(String),

    #[error("Connection pool exhausted after {timeout_ms} ms")]
    PoolExhausted { timeout_ms: u64 },

    #[error("Query failed after {attempts} attempt(s): {source}")]
    QueryFailed {
        attempts: u32,
        #[source]
        source: BoxedCause,
    },

    #[error("Index load failed: {0}")]
    IndexLoad(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for SiftError {
    fn from(err: toml::de::Error) -> Self {
        SiftError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SiftError {
    fn from(err: toml::ser::Error) -> Self {
        SiftError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SiftError {
    fn from(err: serde_json::Error) -> Self {
        SiftError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for sift operations.
pub type Result<T> = std::result::Result<T, SiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SiftError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_pool_exhausted_display() {
        let err = SiftError::PoolExhausted { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Connection pool exhausted after 5000 ms");
    }

    #[test]
    fn test_query_failed_keeps_cause() {
        use std::error::Error as _;

        let cause = std::io::Error::new(std::io::ErrorKind::Other, "database is locked");
        let err = SiftError::QueryFailed {
            attempts: 3,
            source: Box::new(cause),
        };
        assert!(err.to_string().contains("3 attempt(s)"));
        let source = err.source().expect("cause should be exposed");
        assert!(source.to_string().contains("database is locked"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sift_err: SiftError = io_err.into();
        assert!(matches!(sift_err, SiftError::Io(_)));
        assert!(sift_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let sift_err: SiftError = err.unwrap_err().into();
        assert!(matches!(sift_err, SiftError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let sift_err: SiftError = err.unwrap_err().into();
        assert!(matches!(sift_err, SiftError::Serialization(_)));
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(SiftError, &str)> = vec![
            (
                SiftError::InvalidMapping("duplicate id".into()),
                "Invalid field mapping: duplicate id",
            ),
            (
                SiftError::InvalidQueryKind("DELETE".into()),
                "Only read-only queries are accepted: DELETE",
            ),
            (
                SiftError::IndexLoad("truncated".into()),
                "Index load failed: truncated",
            ),
            (
                SiftError::Storage("disk full".into()),
                "Storage error: disk full",
            ),
            (
                SiftError::Search("dimension mismatch".into()),
                "Search error: dimension mismatch",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(format!("value {}", value))
        }

        assert_eq!(inner().unwrap(), "value 42");
    }
}
