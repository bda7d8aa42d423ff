//! ---
//! berth_section: "01-core-functionality"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Shared primitives and utilities for the reconciler runtime."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

const DOCKER_HOST_ENV: &str = "DOCKER_HOST";
/// Engine socket of a stock Docker install.
pub const FALLBACK_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Accepted bounds for the random suffix appended to replacement network names.
pub const MIGRATION_SUFFIX_RANGE: std::ops::RangeInclusive<usize> = 8..=32;

fn default_docker_host() -> String {
    match std::env::var(DOCKER_HOST_ENV) {
        Ok(host) if !host.trim().is_empty() => host,
        _ => FALLBACK_DOCKER_HOST.to_owned(),
    }
}

fn default_api_version() -> String {
    "v1.43".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_rollback_failed_start() -> bool {
    true
}

fn default_migration_suffix_len() -> usize {
    12
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the reconciler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no candidate existed and defaults were used.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "BERTH_CONFIG";

    /// Load configuration from disk, respecting the `BERTH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `BERTH_CONFIG` path must exist. When none of the candidates
    /// exist the built-in defaults are returned instead of an error.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        self.reconcile.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection settings for the container runtime control plane.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_docker_host")]
    pub docker_host: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_host: default_docker_host(),
            api_version: default_api_version(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.docker_host.trim().is_empty() {
            return Err(anyhow!("runtime.docker_host cannot be empty"));
        }
        if !self.api_version.starts_with('v') {
            return Err(anyhow!(
                "runtime.api_version must look like 'v1.43', got '{}'",
                self.api_version
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("runtime.request_timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Policy knobs applied by the reconcilers.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_stop_grace_period")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stop_grace_period: Duration,
    /// Remove a freshly created container when its start call fails.
    #[serde(default = "default_rollback_failed_start")]
    pub rollback_failed_start: bool,
    #[serde(default = "default_migration_suffix_len")]
    pub migration_suffix_len: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stop_grace_period: default_stop_grace_period(),
            rollback_failed_start: default_rollback_failed_start(),
            migration_suffix_len: default_migration_suffix_len(),
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<()> {
        if !MIGRATION_SUFFIX_RANGE.contains(&self.migration_suffix_len) {
            return Err(anyhow!(
                "reconcile.migration_suffix_len must be within {}..={}, got {}",
                MIGRATION_SUFFIX_RANGE.start(),
                MIGRATION_SUFFIX_RANGE.end(),
                self.migration_suffix_len
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Disable the rolling file sink entirely (useful for one-shot CLI runs).
    #[serde(default)]
    pub stdout_only: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            stdout_only: false,
        }
    }
}
