// Configuration loading.
//
// Priority order:
// 1. Environment variables (`KEEPSAKE_*`)
// 2. TOML config file (`KEEPSAKE_CONFIG`, else `<config dir>/keepsake/config.toml`)
// 3. Compiled defaults

use crate::error::ConfigError;
use crate::resource::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "KEEPSAKE_CONFIG";
const APP_DIR: &str = "keepsake";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    pub backend: BackendConfig,
    pub retry: RetryConfig,
}

/// Hosted backend: storage buckets and serverless functions share one base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            backend: BackendConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            bucket: "story-files".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

impl Config {
    /// `<config dir>/keepsake/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Directory for the persisted user session and the TUI log file.
    pub fn app_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR))
    }

    /// Loads the file named by `KEEPSAKE_CONFIG` or the default path, then
    /// applies environment overrides. A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// `lookup` is `std::env::var` outside of tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("KEEPSAKE_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(key) = lookup("KEEPSAKE_ANON_KEY") {
            self.backend.anon_key = key;
        }
        if let Some(bucket) = lookup("KEEPSAKE_BUCKET") {
            self.backend.bucket = bucket;
        }
        if let Some(level) = lookup("KEEPSAKE_LOG") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backend.url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.url is empty".to_string()));
        }
        if self.backend.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.bucket is empty".to_string()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn backend_url(&self) -> &str {
        self.backend.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [backend]
            url = "https://abc.supabase.co/"
            anon_key = "anon"

            [retry]
            base_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.bucket, "story-files");
        assert_eq!(config.backend_url(), "https://abc.supabase.co");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.retry.policy().delay_for(1),
            Duration::from_millis(500)
        );
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("KEEPSAKE_BACKEND_URL", "https://env.example"),
            ("KEEPSAKE_BUCKET", "memory-files"),
            ("KEEPSAKE_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.url, "https://env.example");
        assert_eq!(config.backend.bucket, "memory-files");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.backend.anon_key, "");
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = Config::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let result = Config::from_toml_str("[retry\nmax_attempts = 3");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"warn\"\n[backend]\nbucket = \"voice\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.backend.bucket, "voice");
    }
}
