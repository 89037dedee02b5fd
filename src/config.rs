use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use config::{Config, Environment, File, FileFormat};
use crate::downloader::{NoMatchPolicy, RetryPolicy};
use crate::errors::{AppError, Result};
use crate::search::MatcherConfig;

const ENV_PREFIX: &str = "SPOTDL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub max_concurrent_downloads: usize,
    pub max_retries: u32,
    pub backoff_base_secs: f64,
    pub backoff_multiplier: f64,
    pub no_match_policy: NoMatchPolicy,
    /// Lists longer than this are worth handing to the batch manager.
    pub batch_threshold: usize,
    pub event_buffer: usize,
    pub matcher: MatcherConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_retries: 3,
            backoff_base_secs: 1.0,
            backoff_multiplier: 2.0,
            no_match_policy: NoMatchPolicy::Retry,
            batch_threshold: 10,
            event_buffer: 256,
            matcher: MatcherConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads the config file from the user config directory (if present) and
    /// applies `SPOTDL_*` environment overrides on top.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__");
        Self::read(path, Some(environment))
    }

    fn read(path: &Path, environment: Option<Environment>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json).required(false));
        if let Some(environment) = environment {
            builder = builder.add_source(environment);
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        log::debug!("[CONFIG] loaded from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(AppError::Validation(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if !self.backoff_base_secs.is_finite() || self.backoff_base_secs < 0.0 {
            return Err(AppError::Validation(
                "backoff_base_secs must be a non-negative number".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(AppError::Validation("backoff_multiplier must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.matcher.min_score) {
            return Err(AppError::Validation(
                "matcher.min_score must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Could not find config directory".to_string(),
            ))
        })?;

        Ok(config_dir.join("spotify-batch-downloader").join("config.json"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::try_from_secs_f64(self.backoff_base_secs).unwrap_or_default(),
            backoff_multiplier: self.backoff_multiplier,
            no_match: self.no_match_policy,
        }
    }

    /// Caller-side hint only; the batch manager treats every list the same.
    pub fn should_batch(&self, track_count: usize) -> bool {
        track_count > self.batch_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::read(&dir.path().join("config.json"), None).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "max_retries": 5,
                "no_match_policy": "fail_fast",
                "matcher": { "min_score": 0.75 }
            }"#,
        )
        .unwrap();

        let config = AppConfig::read(&path, None).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.no_match_policy, NoMatchPolicy::FailFast);
        assert_eq!(config.matcher.min_score, 0.75);
        assert_eq!(
            config.matcher.duration_tolerance_secs,
            MatcherConfig::default().duration_tolerance_secs
        );
        assert_eq!(config.max_concurrent_downloads, 3);
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_concurrent_downloads": 2 }"#).unwrap();
        std::env::set_var("SPOTDL_CFGTEST_MAX_CONCURRENT_DOWNLOADS", "6");

        let environment = Environment::with_prefix("SPOTDL_CFGTEST")
            .prefix_separator("_")
            .separator("__");
        let config = AppConfig::read(&path, Some(environment)).unwrap();
        std::env::remove_var("SPOTDL_CFGTEST_MAX_CONCURRENT_DOWNLOADS");

        assert_eq!(config.max_concurrent_downloads, 6);
    }

    #[test]
    fn rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_concurrent_downloads": 0 }"#).unwrap();

        assert!(matches!(AppConfig::read(&path, None), Err(AppError::Validation(_))));
    }

    #[test]
    fn save_then_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            batch_threshold: 25,
            backoff_base_secs: 0.5,
            ..AppConfig::default()
        };

        config.save_to(&path)?;
        assert_eq!(AppConfig::read(&path, None)?, config);
        Ok(())
    }

    #[test]
    fn derives_retry_policy() {
        let config = AppConfig { backoff_base_secs: 0.25, max_retries: 1, ..AppConfig::default() };
        let policy = config.retry_policy();
        assert_eq!(policy.backoff_base, Duration::from_millis(250));
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
    }

    #[test]
    fn batch_threshold_is_exclusive() {
        let config = AppConfig::default();
        assert!(!config.should_batch(10));
        assert!(config.should_batch(11));
    }
}
