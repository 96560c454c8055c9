use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::csv::encode_row;
use crate::logic::features::FlowIdentity;
use crate::logic::model::{DecisionTag, Verdict};

/// Decision column of the log
///
/// `Error` rows record flows whose classification failed; they never carry
/// a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoggedTag {
    Attack,
    Normal,
    Error,
}

impl LoggedTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggedTag::Attack => "ATTACK",
            LoggedTag::Normal => "NORMAL",
            LoggedTag::Error => "ERROR",
        }
    }
}

impl From<DecisionTag> for LoggedTag {
    fn from(tag: DecisionTag) -> Self {
        match tag {
            DecisionTag::Attack => LoggedTag::Attack,
            DecisionTag::Normal => LoggedTag::Normal,
        }
    }
}

impl fmt::Display for LoggedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoggedTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ATTACK" => Ok(LoggedTag::Attack),
            "NORMAL" => Ok(LoggedTag::Normal),
            "ERROR" => Ok(LoggedTag::Error),
            other => Err(format!("unknown decision tag: {}", other)),
        }
    }
}

/// One row of the decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedDecision {
    pub timestamp: DateTime<Utc>,
    pub src: Option<String>,
    pub dst: Option<String>,
    pub decision: LoggedTag,
    pub binary_score: Option<f32>,
    pub attack_label: Option<String>,
    pub app_label: Option<String>,
}

impl LoggedDecision {
    pub fn from_verdict(identity: &FlowIdentity, verdict: &Verdict, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            src: identity.src.clone(),
            dst: identity.dst.clone(),
            decision: verdict.decision().into(),
            binary_score: Some(verdict.binary_score()),
            attack_label: verdict.attack_label().map(|l| l.name.clone()),
            app_label: verdict.app_label().map(|l| l.name.clone()),
        }
    }

    /// Row for a flow whose classification failed
    pub fn failed(identity: &FlowIdentity, binary_score: Option<f32>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            src: identity.src.clone(),
            dst: identity.dst.clone(),
            decision: LoggedTag::Error,
            binary_score,
            attack_label: None,
            app_label: None,
        }
    }

    /// `timestamp,src,dst,decision,binary_score,attack_label,app_label`
    pub fn to_csv_line(&self) -> String {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let score = self
            .binary_score
            .map(|s| s.to_string())
            .unwrap_or_default();

        encode_row(&[
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
            opt(&self.src),
            opt(&self.dst),
            self.decision.as_str().to_string(),
            score,
            opt(&self.attack_label),
            opt(&self.app_label),
        ])
    }
}
