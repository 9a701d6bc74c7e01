use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub boosty: BoostyConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub listen_addr: String,
    /// Path token; the webhook is disabled while this is unset.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostyConfig {
    pub api_base: String,
    pub site_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub default_interval_hours: u32,
    pub idle_secs: u64,
    pub max_sleep_secs: u64,
    pub fetch_timeout_secs: u64,
    pub concurrency: usize,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("postwatch");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("state.db").to_string_lossy().to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            secret: None,
        }
    }
}

impl Default for BoostyConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.boosty.to".to_string(),
            site_base: "https://boosty.to".to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_hours: 1,
            idle_secs: 600,
            max_sleep_secs: 3600,
            fetch_timeout_secs: 10,
            concurrency: 4,
        }
    }
}

impl SchedulerConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            telegram: TelegramConfig::default(),
            webhook: WebhookConfig::default(),
            boosty: BoostyConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path`, or the default location when none is given. Only the
    /// default location is created on first run.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    Self::load_from(&config_path)
                } else {
                    let config = Config::default();
                    config.save_to(&config_path)?;
                    Ok(config)
                }
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("postwatch")
            .join("config.toml")
    }

    /// `TG_TOKEN` and `POSTWATCH_WEBHOOK_SECRET` win over the file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("TG_TOKEN").ok(),
            std::env::var("POSTWATCH_WEBHOOK_SECRET").ok(),
        );
    }

    fn apply_overrides(&mut self, token: Option<String>, secret: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.telegram.token = Some(token);
        }
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.webhook.secret = Some(secret);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;
        if scheduler.default_interval_hours < 1 {
            return Err(AppError::Config(
                "scheduler.default_interval_hours must be at least 1".to_string(),
            ));
        }
        if scheduler.idle_secs == 0 || scheduler.max_sleep_secs == 0 {
            return Err(AppError::Config(
                "scheduler sleep periods must be positive".to_string(),
            ));
        }
        if scheduler.fetch_timeout_secs == 0 {
            return Err(AppError::Config(
                "scheduler.fetch_timeout_secs must be positive".to_string(),
            ));
        }
        if scheduler.concurrency == 0 {
            return Err(AppError::Config(
                "scheduler.concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
db_path = "/tmp/x.db"

[scheduler]
default_interval_hours = 6
"#,
        )
        .unwrap();

        assert_eq!(config.db_path, "/tmp/x.db");
        assert_eq!(config.scheduler.default_interval_hours, 6);
        assert_eq!(config.scheduler.idle_secs, 600);
        assert_eq!(config.scheduler.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.boosty.site_base, "https://boosty.to");
        assert!(config.telegram.token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.db_path = "/tmp/state.db".to_string();
        config.webhook.secret = Some("s3cret".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.db_path, "/tmp/state.db");
        assert_eq!(loaded.webhook.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.telegram.token = Some("file".to_string());

        config.apply_overrides(Some(String::new()), Some("hook".to_string()));
        assert_eq!(config.telegram.token.as_deref(), Some("file"));
        assert_eq!(config.webhook.secret.as_deref(), Some("hook"));

        config.apply_overrides(Some("env".to_string()), None);
        assert_eq!(config.telegram.token.as_deref(), Some("env"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.scheduler.default_interval_hours = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::default();
        config.scheduler.concurrency = 0;
        assert!(config.validate().is_err());
    }
}
