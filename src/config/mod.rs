//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on malformed values.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::telemetry::TelemetryConfig;

/// Settings for one scheduler and the worker pool feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Name used for thread names, spans and metric labels.
    pub name: String,
    /// Worker threads for pools built with [`rayon_pool`](crate::scheduler::rayon_pool).
    pub workers: usize,
    /// Bound on items waiting for dispatch. `None` means unbounded.
    pub input_capacity: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "skeldex".to_string(),
            workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            input_capacity: None,
        }
    }
}

impl SchedulerConfig {
    /// Same settings under another name.
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional: `SKELDEX_WORKERS`,
    /// `SKELDEX_INPUT_CAPACITY`, `SKELDEX_LOG_LEVEL`, `OTEL_ENDPOINT`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let workers = match std::env::var("SKELDEX_WORKERS").ok() {
            Some(raw) => parse_var("SKELDEX_WORKERS", &raw)?,
            None => defaults.scheduler.workers,
        };
        let input_capacity = std::env::var("SKELDEX_INPUT_CAPACITY")
            .ok()
            .map(|raw| parse_var("SKELDEX_INPUT_CAPACITY", &raw))
            .transpose()?;

        let config = Self {
            scheduler: SchedulerConfig {
                workers,
                input_capacity,
                ..defaults.scheduler
            },
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("SKELDEX_LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        config.validate()
    }

    /// Parse configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        config.validate()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Telemetry settings derived from this config.
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            endpoint: self.otel_endpoint.clone(),
            service_name: self.scheduler.name.clone(),
            log_level: self.log_level.clone(),
        }
    }

    fn validate(self) -> Result<Self> {
        if self.scheduler.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.scheduler.input_capacity == Some(0) {
            return Err(Error::Config(
                "input_capacity must be at least 1 when set".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_var(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw:?} is not a count: {e}")))
}
