//! Configuration for an OPML-backed subscription account.
//!
//! Loaded from a TOML file; every section except `[file]` may be omitted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Configuration for one synchronized subscription file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Location and naming of the OPML document.
    pub file: FileConfig,

    /// Debounced save behaviour.
    #[serde(default)]
    pub save: SaveConfig,

    /// External-change watching.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Tracing output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where the subscription list lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Path of the OPML document.
    #[serde(default = "default_opml_path")]
    pub path: PathBuf,

    /// Name written into the document `<title>`.
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

/// Debounce settings for saves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Milliseconds to wait after the first dirty mark before writing.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl SaveConfig {
    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Whether to reload when another process edits the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or filter directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write logs to this file instead of stderr.
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

fn default_opml_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("opmlsync")
        .join("Subscriptions.opml")
}

fn default_display_name() -> String {
    "Subscriptions".into()
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// A config for `path` with every other setting at its default.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file: FileConfig {
                path: path.into(),
                display_name: default_display_name(),
            },
            save: SaveConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load a [`SyncConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading sync configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("sync configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "file.path".into(),
                detail: "OPML path must not be empty".into(),
            });
        }
        if self.file.path.file_name().is_none() {
            return Err(ConfigError::InvalidValue {
                field: "file.path".into(),
                detail: "OPML path must name a file".into(),
            });
        }
        if self.save.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "save.debounce_ms".into(),
                detail: "debounce must be > 0".into(),
            });
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: "log level must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# opmlsync configuration

[file]
path = "~/Library/Application Support/opmlsync/Subscriptions.opml"
display_name = "Subscriptions"

[save]
debounce_ms = 1000

[watch]
enabled = true

[logging]
level = "info"
# file = "/var/log/opmlsync.log"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
[file]
path = "/tmp/opmlsync/Subscriptions.opml"
display_name = "On My Mac"

[save]
debounce_ms = 250

[watch]
enabled = false

[logging]
level = "debug"
file = "/tmp/opmlsync/sync.log"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: SyncConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(
            config.file.path,
            PathBuf::from("/tmp/opmlsync/Subscriptions.opml")
        );
        assert_eq!(config.file.display_name, "On My Mac");
        assert_eq!(config.save.debounce_ms, 250);
        assert_eq!(config.save.debounce(), std::time::Duration::from_millis(250));
        assert!(!config.watch.enabled);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file.is_some());
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[file]
path = "/tmp/subs.opml"
"#;
        let config: SyncConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.file.display_name, "Subscriptions");
        assert_eq!(config.save.debounce_ms, 1000);
        assert!(config.watch.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opmlsync.toml");
        std::fs::write(&path, sample_toml()).unwrap();

        let config = SyncConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = SyncConfig::load_from_file("/nonexistent/opmlsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[file\npath = ").unwrap();
        assert!(matches!(
            SyncConfig::load_from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_debounce() {
        let mut config = SyncConfig::for_path("/tmp/subs.opml");
        config.save.debounce_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "save.debounce_ms"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let config = SyncConfig::for_path("");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "file.path"
        ));
    }

    #[test]
    fn test_default_template_is_valid() {
        let config: SyncConfig = toml::from_str(SyncConfig::default_template())
            .expect("default template should be valid TOML");
        assert!(config.validate().is_ok());
    }
}
