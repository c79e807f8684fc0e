//! Server configuration.
//!
//! Configuration is JSON, read from the file given with `--config` or from
//! the `WORKSHEET_SERVER_CONFIG` environment variable. Every field has a
//! default, so running without any configuration is valid.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Environment variable holding the JSON configuration.
pub const CONFIG_ENV: &str = "WORKSHEET_SERVER_CONFIG";

/// Environment variable overriding the listen address.
pub const LISTEN_ENV: &str = "WORKSHEET_LISTEN";

/// Top-level configuration for the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address to accept worksheet connections on. Port 0 picks a free port.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// File to write the bound port number to, for the process launcher.
    #[serde(default)]
    pub port_file: Option<PathBuf>,

    /// Pre-execution lint rules.
    #[serde(default)]
    pub lint: LintConfig,
}

/// Which lint rules run before each cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LintConfig {
    /// Report and rewrite curly double quotes.
    #[serde(default = "enabled")]
    pub smart_quotes: bool,

    /// Report numbers directly followed by a name or `(`.
    #[serde(default = "enabled")]
    pub implicit_multiplication: bool,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            smart_quotes: true,
            implicit_multiplication: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port_file: None,
            lint: LintConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:0".into()
}

const fn enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from `WORKSHEET_SERVER_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => {
                serde_json::from_str(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))
            }
            Err(_) => {
                debug!("{CONFIG_ENV} not set, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Resolve the listen address.
    ///
    /// Priority: `WORKSHEET_LISTEN` env var > configured `listen`.
    pub fn resolved_listen(&self) -> String {
        std::env::var(LISTEN_ENV).unwrap_or_else(|_| self.listen.clone())
    }

    /// Create a config from a JSON string (for testing).
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.listen, "127.0.0.1:0");
        assert!(config.port_file.is_none());
        assert_eq!(config.lint, LintConfig::default());
        assert!(config.lint.smart_quotes);
        assert!(config.lint.implicit_multiplication);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "listen": "0.0.0.0:6000",
            "port_file": "/tmp/worksheet.port",
            "lint": { "smart_quotes": true, "implicit_multiplication": false }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.listen, "0.0.0.0:6000");
        assert_eq!(
            config.port_file.as_deref(),
            Some(Path::new("/tmp/worksheet.port"))
        );
        assert!(config.lint.smart_quotes);
        assert!(!config.lint.implicit_multiplication);
    }

    #[test]
    fn partial_lint_section_keeps_other_rule_enabled() {
        let config = Config::from_json(r#"{"lint": {"smart_quotes": false}}"#).unwrap();
        assert!(!config.lint.smart_quotes);
        assert!(config.lint.implicit_multiplication);
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worksheet.json");
        std::fs::write(&path, r#"{"listen": "127.0.0.1:7777"}"#).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7777");
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/worksheet.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn from_file_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ listen: ").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
