//! Policy Thresholds
//!
//! Two process-wide cut-offs, read at startup and never changed:
//! - `binary`: score strictly above it is ATTACK, at or below is NORMAL
//! - `enforcement`: ATTACK verdicts scoring at least this are blocked

use serde::{Deserialize, Serialize};

use super::verdict::DecisionTag;
use crate::constants::{DEFAULT_BINARY_THRESHOLD, DEFAULT_ENFORCEMENT_THRESHOLD};

/// Threshold Configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyThresholds {
    /// Binary decision threshold (0.0 - 1.0)
    pub binary: f32,

    /// Minimum ATTACK score that triggers enforcement (0.0 - 1.0)
    pub enforcement: f32,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY_THRESHOLD,
            enforcement: DEFAULT_ENFORCEMENT_THRESHOLD,
        }
    }
}

impl PolicyThresholds {
    pub fn new(binary: f32, enforcement: f32) -> Self {
        Self { binary, enforcement }
    }

    /// Strict greater-than: `score == binary` is NORMAL
    pub fn decide(&self, score: f32) -> DecisionTag {
        if score > self.binary {
            DecisionTag::Attack
        } else {
            DecisionTag::Normal
        }
    }

    /// Only ATTACK verdicts are ever enforced
    pub fn should_enforce(&self, decision: DecisionTag, score: f32) -> bool {
        decision == DecisionTag::Attack && score >= self.enforcement
    }
}
