use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use super::diagnostics::ConfigError;
use super::diagnostics::SourceInfo;
use super::LogLevel;
use crate::cover::TiltPolicy;

/// Configuration as written in the file, before validation.
///
/// Values that validation may complain about are kept `Spanned` so the
/// diagnostics can point at them.
#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    pub logging: Option<PartialLoggingConfig>,
    pub scheduler: Option<PartialSchedulerConfig>,
    pub api: Option<PartialApiConfig>,
    pub backends: Option<PartialBackendsConfig>,
    #[serde(default)]
    pub covers: Vec<PartialCoverConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<toml::Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, toml::Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialSchedulerConfig {
    pub tick_interval_ms: Option<toml::Spanned<i64>>,
    pub tolerance: Option<toml::Spanned<f64>>,
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialBackendsConfig {
    pub mqtt: Option<PartialMqttConfig>,
    pub log: Option<PartialLogBackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialMqttConfig {
    pub broker: Option<toml::Spanned<String>>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub base_topic: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialLogBackendConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialCoverConfig {
    pub real_entity_id: Option<toml::Spanned<String>>,
    pub name: Option<toml::Spanned<String>>,
    pub open_time_sec: Option<toml::Spanned<i64>>,
    pub tilt_time_ms: Option<toml::Spanned<i64>>,
    pub unique_id: Option<toml::Spanned<String>>,
    pub trace_ticks: Option<bool>,
    pub tilt_policy: Option<TiltPolicy>,
}

impl PartialConfig {
    /// Load a single config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config = Self::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    fn from_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Nothing at all was configured
    pub fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.scheduler.is_none()
            && self.api.is_none()
            && self.backends.is_none()
            && self.covers.is_empty()
    }
}
