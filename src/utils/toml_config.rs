//! TOML-based configuration for Hypatia
//!
//! Retry bounds, timeouts, concurrency limits and per-worker overrides are
//! declared in a TOML file (`hypatia.toml`). Every section is optional; an
//! empty file yields the defaults.
//!
//! ```toml
//! [coordinator]
//! max_retries = 3
//! step_timeout_secs = 300
//!
//! [gateway]
//! max_in_flight = 8
//!
//! [session]
//! default_dataset = "isb-cgc-bq.TCGA.clinical_gdc_current"
//!
//! [workers.visualization]
//! on_failure = { policy = "skip_dependents" }
//! ```
//!
//! # Reloading
//!
//! [`HypatiaConfigManager`] keeps the current configuration behind an
//! `ArcSwap`. Each pipeline takes a snapshot when it starts, so a reload
//! only affects pipelines submitted afterwards.

use crate::planning::FailurePolicy;
use crate::workers::WorkerKind;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Root configuration structure loaded from hypatia.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HypatiaConfig {
    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub session: SessionSettings,

    /// Per-worker overrides keyed by worker name
    #[serde(default)]
    pub workers: HashMap<String, WorkerSettings>,
}

// ============= Coordinator Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Keyword,
    Reasoning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Retries after the first attempt, for transient failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Delay before the first retry; doubles per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Independent steps dispatched at once within one pipeline
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,

    /// Finished pipelines kept for status queries and follow-ups
    #[serde(default = "default_retained_pipelines")]
    pub retained_pipelines: usize,

    #[serde(default)]
    pub classifier: ClassifierKind,
}

fn default_max_retries() -> u32 {
    3
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_max_concurrent_steps() -> usize {
    4
}

fn default_retained_pipelines() -> usize {
    256
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            step_timeout_secs: default_step_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_concurrent_steps: default_max_concurrent_steps(),
            retained_pipelines: default_retained_pipelines(),
            classifier: ClassifierKind::default(),
        }
    }
}

impl CoordinatorSettings {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

// ============= Gateway Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

fn default_max_in_flight() -> usize {
    8
}

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_max_tool_iterations() -> usize {
    5
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            call_timeout_secs: default_call_timeout_secs(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

// ============= Session & Worker Configuration =============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Dataset used when a request does not name one
    #[serde(default)]
    pub default_dataset: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Replaces the worker's built-in system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Standing instructions added to every step for this worker
    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub on_failure: Option<FailurePolicy>,
}

// ============= Configuration Loading & Validation =============

/// Configuration warnings that don't prevent operation but may indicate issues
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub kind: ConfigWarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarningKind {
    BackoffCapBelowBase,
    StepTimeoutBelowCallTimeout,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown worker '{0}' in [workers] section")]
    UnknownWorker(String),

    #[error("Environment variable '{0}' has invalid value '{1}'")]
    InvalidEnvVar(String, String),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl HypatiaConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HypatiaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate limits and worker names
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("coordinator.step_timeout_secs", self.coordinator.step_timeout_secs as usize),
            ("coordinator.max_concurrent_steps", self.coordinator.max_concurrent_steps),
            ("coordinator.retained_pipelines", self.coordinator.retained_pipelines),
            ("gateway.max_in_flight", self.gateway.max_in_flight),
            ("gateway.call_timeout_secs", self.gateway.call_timeout_secs as usize),
            ("gateway.max_tool_iterations", self.gateway.max_tool_iterations),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        for name in self.workers.keys() {
            if !WorkerKind::ALL.iter().any(|kind| kind.as_str() == name) {
                return Err(ConfigError::UnknownWorker(name.clone()));
            }
        }

        if let Some(dataset) = &self.session.default_dataset {
            if dataset.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "session.default_dataset must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Validate, then report settings that work but are probably mistakes
    pub fn validate_with_warnings(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.validate()?;
        let mut warnings = Vec::new();

        if self.coordinator.max_backoff_ms < self.coordinator.retry_backoff_ms {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::BackoffCapBelowBase,
                message: format!(
                    "max_backoff_ms ({}) is below retry_backoff_ms ({}); every retry waits {}ms",
                    self.coordinator.max_backoff_ms,
                    self.coordinator.retry_backoff_ms,
                    self.coordinator.max_backoff_ms
                ),
            });
        }

        if self.coordinator.step_timeout_secs < self.gateway.call_timeout_secs {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::StepTimeoutBelowCallTimeout,
                message: format!(
                    "step_timeout_secs ({}) is shorter than a single gateway call ({})",
                    self.coordinator.step_timeout_secs, self.gateway.call_timeout_secs
                ),
            });
        }

        Ok(warnings)
    }

    /// Apply `HYPATIA_*` environment overrides (loading `.env` first).
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        dotenvy::dotenv().ok();

        if let Ok(value) = std::env::var("HYPATIA_MAX_RETRIES") {
            self.coordinator.max_retries = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar("HYPATIA_MAX_RETRIES".into(), value))?;
        }
        if let Ok(value) = std::env::var("HYPATIA_STEP_TIMEOUT_SECS") {
            self.coordinator.step_timeout_secs = value.parse().map_err(|_| {
                ConfigError::InvalidEnvVar("HYPATIA_STEP_TIMEOUT_SECS".into(), value)
            })?;
        }
        if let Ok(value) = std::env::var("HYPATIA_DEFAULT_DATASET") {
            self.session.default_dataset = Some(value);
        }

        self.validate()
    }

    pub fn worker(&self, kind: WorkerKind) -> Option<&WorkerSettings> {
        self.workers.get(kind.as_str())
    }

    pub fn system_prompt_for(&self, kind: WorkerKind) -> Option<&str> {
        self.worker(kind).and_then(|w| w.system_prompt.as_deref())
    }
}

// ============= Reloadable Configuration Manager =============

/// Thread-safe configuration holder with manual reload
pub struct HypatiaConfigManager {
    config: Arc<ArcSwap<HypatiaConfig>>,
    config_path: PathBuf,
}

impl HypatiaConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = HypatiaConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
        })
    }

    /// Create a config manager directly from a config (no backing file)
    pub fn from_config(config: HypatiaConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("hypatia.toml"),
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<HypatiaConfig> {
        self.config.load_full()
    }

    /// Replace the configuration in memory
    pub fn store(&self, config: HypatiaConfig) {
        self.config.store(Arc::new(config));
    }

    /// Reload the configuration from disk; the old one stays on error
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = HypatiaConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }
}

impl Clone for HypatiaConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
        }
    }
}
