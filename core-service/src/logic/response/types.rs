//! Enforcement Types

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logic::features::FlowIdentity;

// ============================================================================
// REQUEST
// ============================================================================

/// Drop traffic between two endpoints for a while
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementRequest {
    pub src: String,
    pub dst: String,
    pub block_duration_secs: u64,
}

impl EnforcementRequest {
    /// `None` when either endpoint is unknown: there is nothing to match on
    pub fn for_flow(identity: &FlowIdentity, block_duration: Duration) -> Option<Self> {
        Some(Self {
            src: identity.src.clone()?,
            dst: identity.dst.clone()?,
            block_duration_secs: block_duration.as_secs(),
        })
    }

    pub fn pair(&self) -> (String, String) {
        (self.src.clone(), self.dst.clone())
    }

    pub fn description(&self) -> String {
        format!(
            "Block {} -> {} for {}s",
            self.src, self.dst, self.block_duration_secs
        )
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementStatus {
    /// Rule installed by the controller
    Applied,
    /// An unexpired rule for the pair already exists
    AlreadyBlocked,
    /// Logged only, nothing installed
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementOutcome {
    pub request: EnforcementRequest,
    pub status: EnforcementStatus,
    pub message: String,
    pub timestamp: i64,
    pub duration_ms: u64,
}

impl EnforcementOutcome {
    pub fn new(request: EnforcementRequest, status: EnforcementStatus, duration_ms: u64) -> Self {
        let message = match status {
            EnforcementStatus::Applied => request.description(),
            EnforcementStatus::AlreadyBlocked => {
                format!("{} -> {} is already blocked", request.src, request.dst)
            }
            EnforcementStatus::DryRun => format!("Would {}", request.description().to_lowercase()),
        };
        Self {
            request,
            status,
            message,
            timestamp: Utc::now().timestamp(),
            duration_ms,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("controller rejected rule (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}
