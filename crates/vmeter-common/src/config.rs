//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_max_elapsed() -> Duration {
    Duration::from_secs(2 * 3600)
}

fn default_escalate_after() -> u32 {
    3
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("target/vmeter/counters.json")
}

fn default_store_directory() -> PathBuf {
    PathBuf::from("target/vmeter/state")
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("target/vmeter/audit.log")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for a vmeter deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub integrator: IntegratorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Initial totals for counters migrated from a prior system.
    #[serde(default)]
    pub seeds: Vec<SeedConfig>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "VMETER_CONFIG";

    /// Load configuration from disk, respecting the `VMETER_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.integrator.validate()?;
        let mut seen = BTreeSet::new();
        for seed in &self.seeds {
            seed.validate()?;
            if !seen.insert((seed.device.as_str(), seed.counter.as_str())) {
                return Err(anyhow!(
                    "duplicate seed for counter {}/{}",
                    seed.device,
                    seed.counter
                ));
            }
        }
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

/// Tuning for the energy integrator.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratorConfig {
    /// Longest gap between two samples that is still integrated. Longer gaps
    /// are discarded rather than extrapolated.
    #[serde(default = "default_max_elapsed")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_elapsed: Duration,
    /// Consecutive persistence failures tolerated before the fault reporter is called.
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u32,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            max_elapsed: default_max_elapsed(),
            escalate_after: default_escalate_after(),
        }
    }
}

impl IntegratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_elapsed.is_zero() {
            return Err(anyhow!("integrator.max_elapsed must be greater than zero"));
        }
        if self.escalate_after == 0 {
            return Err(anyhow!("integrator.escalate_after must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            path: default_ledger_path(),
        }
    }
}

/// Value store settings. When `durable` is set every component state is
/// mirrored to `directory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub durable: bool,
    #[serde(default = "default_store_directory")]
    pub directory: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            durable: false,
            directory: default_store_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
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
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Starting totals for one counter, used when the ledger has no entry yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedConfig {
    pub device: String,
    pub counter: String,
    #[serde(default)]
    pub imported_wh: f64,
    #[serde(default)]
    pub exported_wh: f64,
}

impl SeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() || self.counter.is_empty() {
            return Err(anyhow!("seed device and counter must not be empty"));
        }
        if self.device.contains('/') {
            return Err(anyhow!("seed device '{}' must not contain '/'", self.device));
        }
        for (name, value) in [
            ("imported_wh", self.imported_wh),
            ("exported_wh", self.exported_wh),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!(
                    "seed {}/{}: {} must be a finite non-negative number",
                    self.device,
                    self.counter,
                    name
                ));
            }
        }
        Ok(())
    }
}
