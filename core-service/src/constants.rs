//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Every value here can be overridden through a `FLOWGUARD_*` variable (see `config.rs`).

use std::path::PathBuf;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FLOWGUARD_";

/// Default tailed flow log (Zeek `conn.log` in JSON mode)
pub const DEFAULT_FLOW_LOG: &str = "conn.log";

/// Default poll interval for the flow log (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default capacity of the queue between tailer and worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default TF-Serving REST base URL
pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:8501/v1/models";

/// Default model names on the inference server
pub const DEFAULT_BINARY_MODEL: &str = "binary_classifier";
pub const DEFAULT_ATTACK_MODEL: &str = "attack_classifier";
pub const DEFAULT_APP_MODEL: &str = "app_classifier";
pub const DEFAULT_IMPUTER_MODEL: &str = "imputer";

/// Default per-request timeout for every backend call (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3_000;

/// Default extra attempts for a flow whose backend call failed transiently
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 0;

/// Default pause between per-flow retries (milliseconds)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

/// Default binary decision threshold (strictly greater => ATTACK)
pub const DEFAULT_BINARY_THRESHOLD: f32 = 0.8;

/// Default enforcement threshold (greater or equal => block)
pub const DEFAULT_ENFORCEMENT_THRESHOLD: f32 = 0.8;

/// Default attempts for a decision log append before escalating
pub const DEFAULT_STORAGE_RETRIES: u32 = 3;

/// Default Ryu REST controller
pub const DEFAULT_RYU_URL: &str = "http://127.0.0.1:8080";

/// Default datapath id for installed drop rules
pub const DEFAULT_RYU_DPID: u64 = 1;

/// Default block duration (seconds)
pub const DEFAULT_BLOCK_DURATION_SECS: u64 = 60;

/// Default number of rows served by the reporting query
pub const DEFAULT_REPORT_LIMIT: usize = 50;

/// Decision log file name
pub const DECISION_LOG_FILE: &str = "predictions.csv";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "FlowGuard";

/// Default decision log location: `<data_local_dir>/flowguard/predictions.csv`
pub fn default_decision_log() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowguard")
        .join(DECISION_LOG_FILE)
}

/// Full variable name for a config key
pub fn env_key(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key)
}
