//! Pipeline Configuration
//!
//! Built once at startup from `FLOWGUARD_*` variables and then shared
//! read-only with the tailer and the worker. Nothing here changes at runtime.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{self, env_key};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(String),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

// ============================================================================
// ENFORCEMENT MODE
// ============================================================================

/// Which enforcement connector the daemon wires in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    /// Never request a block
    Off,
    /// Log "would block" only (dry run)
    LogOnly,
    /// Install drop rules through a Ryu SDN controller
    Ryu,
}

impl FromStr for EnforcementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" => Ok(EnforcementMode::Off),
            "log" | "dry-run" | "dryrun" => Ok(EnforcementMode::LogOnly),
            "ryu" => Ok(EnforcementMode::Ryu),
            other => Err(format!("unknown enforcement mode '{}'", other)),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Flow log to tail
    pub flow_log: PathBuf,
    pub poll_interval: Duration,
    /// Wake the tailer on filesystem events in addition to polling
    pub watch_events: bool,
    pub queue_capacity: usize,

    /// Ordered feature names; `None` uses the built-in reference layout
    pub schema_path: Option<PathBuf>,
    pub scaler77_path: PathBuf,
    pub scaler78_path: PathBuf,
    pub scaler77_sha256: Option<String>,
    pub scaler78_sha256: Option<String>,

    pub inference_url: String,
    pub binary_model: String,
    pub attack_model: String,
    pub app_model: String,
    pub imputer_model: String,
    /// Local ONNX imputer (only honoured with the `onnx` feature)
    pub imputer_onnx_path: Option<PathBuf>,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,

    pub binary_threshold: f32,
    pub enforcement_threshold: f32,

    pub attack_labels_path: Option<PathBuf>,
    pub app_labels_path: Option<PathBuf>,

    pub decision_log: PathBuf,
    pub storage_retries: u32,

    pub enforcement: EnforcementMode,
    pub ryu_url: String,
    pub ryu_dpid: u64,
    pub block_duration: Duration,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Keys are passed fully prefixed (e.g. `FLOWGUARD_FLOW_LOG`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let config = Self {
            flow_log: vars
                .path("FLOW_LOG")
                .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_FLOW_LOG)),
            poll_interval: Duration::from_millis(
                vars.parse("POLL_INTERVAL_MS", constants::DEFAULT_POLL_INTERVAL_MS)?,
            ),
            watch_events: vars.flag("WATCH_EVENTS", true)?,
            queue_capacity: vars.parse("QUEUE_CAPACITY", constants::DEFAULT_QUEUE_CAPACITY)?,

            schema_path: vars.path("SCHEMA_PATH"),
            scaler77_path: vars.required_path("SCALER77_PATH")?,
            scaler78_path: vars.required_path("SCALER78_PATH")?,
            scaler77_sha256: vars.string("SCALER77_SHA256"),
            scaler78_sha256: vars.string("SCALER78_SHA256"),

            inference_url: vars
                .string("INFERENCE_URL")
                .unwrap_or_else(|| constants::DEFAULT_INFERENCE_URL.to_string()),
            binary_model: vars
                .string("BINARY_MODEL")
                .unwrap_or_else(|| constants::DEFAULT_BINARY_MODEL.to_string()),
            attack_model: vars
                .string("ATTACK_MODEL")
                .unwrap_or_else(|| constants::DEFAULT_ATTACK_MODEL.to_string()),
            app_model: vars
                .string("APP_MODEL")
                .unwrap_or_else(|| constants::DEFAULT_APP_MODEL.to_string()),
            imputer_model: vars
                .string("IMPUTER_MODEL")
                .unwrap_or_else(|| constants::DEFAULT_IMPUTER_MODEL.to_string()),
            imputer_onnx_path: vars.path("IMPUTER_ONNX_PATH"),
            request_timeout: Duration::from_millis(
                vars.parse("REQUEST_TIMEOUT_MS", constants::DEFAULT_REQUEST_TIMEOUT_MS)?,
            ),
            retry_attempts: vars.parse("RETRY_ATTEMPTS", constants::DEFAULT_RETRY_ATTEMPTS)?,
            retry_backoff: Duration::from_millis(
                vars.parse("RETRY_BACKOFF_MS", constants::DEFAULT_RETRY_BACKOFF_MS)?,
            ),

            binary_threshold: vars.parse("BINARY_THRESHOLD", constants::DEFAULT_BINARY_THRESHOLD)?,
            enforcement_threshold: vars.parse(
                "ENFORCEMENT_THRESHOLD",
                constants::DEFAULT_ENFORCEMENT_THRESHOLD,
            )?,

            attack_labels_path: vars.path("ATTACK_LABELS"),
            app_labels_path: vars.path("APP_LABELS"),

            decision_log: vars
                .path("DECISION_LOG")
                .unwrap_or_else(constants::default_decision_log),
            storage_retries: vars.parse("STORAGE_RETRIES", constants::DEFAULT_STORAGE_RETRIES)?,

            enforcement: vars.parse("ENFORCEMENT", EnforcementMode::LogOnly)?,
            ryu_url: vars
                .string("RYU_URL")
                .unwrap_or_else(|| constants::DEFAULT_RYU_URL.to_string()),
            ryu_dpid: vars.parse("RYU_DPID", constants::DEFAULT_RYU_DPID)?,
            block_duration: Duration::from_secs(
                vars.parse("BLOCK_DURATION_SECS", constants::DEFAULT_BLOCK_DURATION_SECS)?,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(invalid("POLL_INTERVAL_MS", "0", "must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("QUEUE_CAPACITY", "0", "must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("REQUEST_TIMEOUT_MS", "0", "must be positive"));
        }
        if self.block_duration.is_zero() {
            // OpenFlow reads hard_timeout 0 as a permanent rule
            return Err(invalid("BLOCK_DURATION_SECS", "0", "must be positive"));
        }
        if self.storage_retries == 0 {
            return Err(invalid("STORAGE_RETRIES", "0", "at least one attempt is required"));
        }
        for (key, value) in [
            ("BINARY_THRESHOLD", self.binary_threshold),
            ("ENFORCEMENT_THRESHOLD", self.enforcement_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, &value.to_string(), "must be within [0, 1]"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: env_key(key),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// LOOKUP HELPERS
// ============================================================================

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&env_key(key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    fn required_path(&self, key: &str) -> Result<PathBuf, ConfigError> {
        self.path(key).ok_or_else(|| ConfigError::Missing(env_key(key)))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &raw, "expected a boolean")),
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
