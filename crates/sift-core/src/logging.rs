//! Tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for the process.
///
/// `RUST_LOG` wins when set; otherwise `level` (normally
/// `GeneralConfig::log_level`) is used. Returns `false` when a global
/// subscriber was already installed.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init("debug");
        assert!(!init("info"));
    }
}
