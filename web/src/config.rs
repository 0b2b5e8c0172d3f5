use std::path::Path;

use anyhow::Context;
use engine::MigrationConfig;
use serde::Deserialize;

const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Server configuration as read from the TOML file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind: String,
    pub logging: LoggingConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON lines instead of human readable output
    pub json: bool,
    /// `EnvFilter` directive, overridden by RUST_LOG
    pub filter: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            logging: LoggingConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info,engine=debug".to_string(),
        }
    }
}

impl WebConfig {
    /// Load `path` if it exists, defaults otherwise
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = WebConfig::parse(
            r#"
            bind = "0.0.0.0:9000"

            [migration]
            migration_enabled = false

            [migration.blob]
            page_size = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.bind, "0.0.0.0:9000");
        assert!(!config.migration.migration_enabled);
        assert_eq!(config.migration.blob.page_size, 100);
        assert_eq!(config.migration.retry.blob_download_attempts, 5);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = WebConfig::load(Path::new("/nonexistent/migration.toml")).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND);
    }
}
