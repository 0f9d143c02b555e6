//! Engine configuration
//!
//! Loaded from a toml file by the host, with serde defaults for every field
//! so a missing or partial file still yields a working engine.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Local terminal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Fallback size when the rendering surface cannot be measured
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    /// Shell for new tabs; `None` selects the platform default
    #[serde(default)]
    pub default_shell: Option<String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_rows: default_rows(),
            default_cols: default_cols(),
            default_shell: None,
        }
    }
}

/// Remote bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Relay endpoint for the control connection
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Heartbeat period while connected
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Output silence after which a remote command counts as finished
    #[serde(default = "default_inactivity_threshold_ms")]
    pub inactivity_threshold_ms: u64,
    /// Cadence of the completion checker once the grace period has passed
    #[serde(default = "default_completion_poll_ms")]
    pub completion_poll_ms: u64,
    /// Switch the code page before remote commands so non-ASCII text
    /// round-trips. Only useful on Windows-class hosts.
    #[serde(default = "default_prime_code_page")]
    pub prime_code_page: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            heartbeat_secs: default_heartbeat_secs(),
            inactivity_threshold_ms: default_inactivity_threshold_ms(),
            completion_poll_ms: default_completion_poll_ms(),
            prime_code_page: default_prime_code_page(),
        }
    }
}

/// Logging settings, consumed by [`crate::logging::init_logging`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub file_output: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a toml file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::FileNotFound { .. }) => Self::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to default configuration");
                Self::default()
            }
        }
    }
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

fn default_relay_url() -> String {
    "wss://relay.termdeck.dev/control".to_string()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_inactivity_threshold_ms() -> u64 {
    2000
}

fn default_completion_poll_ms() -> u64 {
    500
}

fn default_prime_code_page() -> bool {
    cfg!(windows)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.terminal.default_rows, 24);
        assert_eq!(config.terminal.default_cols, 80);
        assert_eq!(config.remote.heartbeat_secs, 30);
        assert_eq!(config.remote.inactivity_threshold_ms, 2000);
        assert_eq!(config.remote.completion_poll_ms, 500);
        assert_eq!(config.remote.prime_code_page, cfg!(windows));
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[remote]\ninactivity_threshold_ms = 5000\n\n[terminal]\ndefault_shell = \"/bin/zsh\"\n"
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.remote.inactivity_threshold_ms, 5000);
        assert_eq!(config.remote.completion_poll_ms, 500);
        assert_eq!(config.terminal.default_shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.terminal.default_rows, 24);
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/termdeck.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));

        let config = EngineConfig::load_or_default(Path::new("/nonexistent/termdeck.toml"));
        assert_eq!(config.remote.heartbeat_secs, 30);
    }
}
