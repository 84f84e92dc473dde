use crate::manager::ManagerOptions;
use crate::session::Settings;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variables override file values: `CAPTIONS__SESSIONS__MAX_SESSIONS=4`
const ENV_PREFIX: &str = "CAPTIONS";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub sessions: Settings,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "caption-sessions".to_string(),
        }
    }
}

/// Liveness sweep timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub sweep_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
        }
    }
}

impl RuntimeConfig {
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
    }
}

impl Config {
    /// Load `<path>.{toml,json,yaml,...}` plus environment overrides
    pub fn load(path: &str) -> Result<Self> {
        Self::from_source(config::File::with_name(path))
            .with_context(|| format!("Failed to load config {}", path))
    }

    /// Load an exact file path plus environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_source(config::File::from(path))
            .with_context(|| format!("Failed to load config {}", path.display()))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
