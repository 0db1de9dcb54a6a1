//! Configuration loading for MusicFlow services
//!
//! Bootstrap configuration lives in a small TOML file; settings here cannot
//! change while a service is running. Runtime tuning (worker count, retention)
//! has built-in defaults defined in code, not external files.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bootstrap configuration loaded from a TOML file
///
/// **Minimal by design** - only bootstrap concerns live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Directory MIDI clips are written into
    ///
    /// If not specified, falls back to `./output`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Number of concurrent generation workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Age in seconds after which terminal tasks drop out of the default
    /// task-list view (they are never evicted from storage)
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            worker_count: default_worker_count(),
            retention_seconds: default_retention_seconds(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_retention_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from a TOML file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {:?}: {}", path, e)))
}

/// Write configuration to a TOML file
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default configuration file path for the platform
///
/// `~/.config/musicflow/config.toml` on Linux, the platform config dir
/// elsewhere; falls back to the current directory when no config dir exists.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("musicflow").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("musicflow.toml"))
}

/// Resolve the output directory for MIDI clips
///
/// Priority: explicit config value, then `MUSICFLOW_OUTPUT_DIR`, then
/// `./output`.
pub fn resolve_output_dir(config: &TomlConfig) -> PathBuf {
    if let Some(dir) = &config.output_dir {
        return dir.clone();
    }
    if let Ok(dir) = std::env::var("MUSICFLOW_OUTPUT_DIR") {
        debug!(dir = %dir, "Using output directory from MUSICFLOW_OUTPUT_DIR");
        return PathBuf::from(dir);
    }
    warn!("No output directory configured; defaulting to ./output");
    PathBuf::from("./output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.retention_seconds, 300);
        assert_eq!(config.logging.level, "info");
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("musicflow.toml");

        let config = TomlConfig {
            output_dir: Some(PathBuf::from("/tmp/clips")),
            worker_count: 2,
            retention_seconds: 60,
            logging: LoggingConfig {
                level: "debug".to_string(),
                file: None,
            },
        };

        write_toml_config(&config, &path).unwrap();
        let loaded = load_toml_config(&path).unwrap();

        assert_eq!(loaded.output_dir, Some(PathBuf::from("/tmp/clips")));
        assert_eq!(loaded.worker_count, 2);
        assert_eq!(loaded.retention_seconds, 60);
        assert_eq!(loaded.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("musicflow.toml");
        std::fs::write(&path, "worker_count = 8\n").unwrap();

        let loaded = load_toml_config(&path).unwrap();
        assert_eq!(loaded.worker_count, 8);
        assert_eq!(loaded.retention_seconds, 300);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_resolve_output_dir_prefers_config_value() {
        let config = TomlConfig {
            output_dir: Some(PathBuf::from("/tmp/clips")),
            ..TomlConfig::default()
        };
        assert_eq!(resolve_output_dir(&config), PathBuf::from("/tmp/clips"));

        std::env::remove_var("MUSICFLOW_OUTPUT_DIR");
        assert_eq!(
            resolve_output_dir(&TomlConfig::default()),
            PathBuf::from("./output")
        );
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("musicflow.toml");
        std::fs::write(&path, "worker_count = \"four\"\n").unwrap();

        let err = load_toml_config(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
