//! Configuration module

use std::env;
use std::path::PathBuf;

use flowguard_core::constants::{self, DEFAULT_REPORT_LIMIT};
use validator::{Validate, ValidationError};

/// Hard ceiling on rows per request
pub const DEFAULT_MAX_LIMIT: usize = 1000;

/// Application configuration
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "default_within_max"))]
pub struct Config {
    /// Decision log written by the flow daemon
    pub decision_log: PathBuf,

    /// Server port
    pub port: u16,

    /// Rows returned when the request gives no limit
    #[validate(range(min = 1))]
    pub default_limit: usize,

    /// Largest accepted `limit`
    #[validate(range(min = 1))]
    pub max_limit: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            decision_log: lookup("DECISION_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(constants::default_decision_log),

            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),

            default_limit: lookup("REPORT_DEFAULT_LIMIT")
                .and_then(|l| l.parse().ok())
                .unwrap_or(DEFAULT_REPORT_LIMIT),

            max_limit: lookup("REPORT_MAX_LIMIT")
                .and_then(|l| l.parse().ok())
                .unwrap_or(DEFAULT_MAX_LIMIT),
        }
    }
}

fn default_within_max(config: &Config) -> Result<(), ValidationError> {
    if config.default_limit > config.max_limit {
        return Err(ValidationError::new("default_limit_exceeds_max"));
    }
    Ok(())
}
