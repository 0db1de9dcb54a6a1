//! Tracing initialization shared by MusicFlow binaries
//!
//! `RUST_LOG` always wins; the configured level is the fallback. Logs go to
//! stderr unless a file is configured.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber from a [`LoggingConfig`]
///
/// Safe to call once per process; a second call returns a `Config` error
/// rather than panicking, so tests sharing a process can ignore it.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("musicflow.log");
        let config = LoggingConfig {
            level: "debug".to_string(),
            file: Some(log_path.clone()),
        };

        // First init in the test process wins; either way the file exists
        // and a second call must not panic.
        let _ = init_logging(&config);
        let _ = init_logging(&config);
        assert!(log_path.exists());
    }
}
