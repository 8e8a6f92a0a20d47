use std::{fs, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Runtime knobs shared by every store bound through a [`crate::store::Context`]
///
/// Cryptographic parameters are not configurable; they are constants in
/// [`crate::crypto`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// How long to wait before re-checking a store location that is not
    ///  visible yet
    #[serde(default = "default_visibility_retry_ms")]
    pub visibility_retry_ms: u64,
    /// Upper bound for queue requests, if not set a request may
    ///  wait forever for its response
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Level name understood by `tracing`, e.g. "info" or "debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_visibility_retry_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            visibility_retry_ms: default_visibility_retry_ms(),
            request_timeout_ms: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn visibility_retry(&self) -> Duration {
        Duration::from_millis(self.visibility_retry_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("toml serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_toml_str("request_timeout_ms = 1500").unwrap();
        assert_eq!(config.visibility_retry_ms, 200);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.log_level().unwrap(), tracing::Level::INFO);
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = Config {
            visibility_retry_ms: 50,
            request_timeout_ms: None,
            log_level: "debug".into(),
        };
        fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.log_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_bad_log_level() {
        let config = Config::from_toml_str("log_level = \"chatty\"").unwrap();
        assert!(matches!(
            config.log_level(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}
