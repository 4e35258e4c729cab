use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use crate::error::{CleaningError, Result};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub project: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            project: "default".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: "basic_cleaning.log".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub pushgateway_url: Option<String>,
    pub job: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: None,
            job: "basic_cleaning".to_string(),
        }
    }
}

impl Config {
    /// Loads `config.toml` (or `$CLEANING_CONFIG`), then applies environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLEANING_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// A missing file yields defaults; a malformed one is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let config_content = fs::read_to_string(path).map_err(|e| {
            CleaningError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("CLEANING_STORE_ROOT") {
            self.store.root = PathBuf::from(root);
        }
        if let Ok(project) = std::env::var("CLEANING_PROJECT") {
            self.store.project = project;
        }
        if let Ok(dir) = std::env::var("CLEANING_LOG_DIR") {
            self.logging.dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("CLEANING_PUSHGATEWAY_URL") {
            if !url.trim().is_empty() {
                self.metrics.pushgateway_url = Some(url);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.store.root, PathBuf::from("data"));
        assert_eq!(config.store.project, "default");
        assert_eq!(config.logging.file_name, "basic_cleaning.log");
        assert!(config.metrics.pushgateway_url.is_none());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [store]
            project = "nyc_airbnb"

            [metrics]
            pushgateway_url = "http://localhost:9091"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.project, "nyc_airbnb");
        assert_eq!(config.store.root, PathBuf::from("data"));
        assert_eq!(config.metrics.pushgateway_url.as_deref(), Some("http://localhost:9091"));
        assert_eq!(config.metrics.job, "basic_cleaning");
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = Config::from_toml("[store\nroot = 1").unwrap_err();
        assert!(matches!(err, CleaningError::Toml(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.store.project, "default");
    }
}
