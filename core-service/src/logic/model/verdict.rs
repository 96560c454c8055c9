//! Verdict - result of classifying one flow

use std::fmt;

use serde::{Deserialize, Serialize};

use super::labels::ClassLabel;

/// Binary decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionTag {
    Attack,
    Normal,
}

impl DecisionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionTag::Attack => "ATTACK",
            DecisionTag::Normal => "NORMAL",
        }
    }
}

impl fmt::Display for DecisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Second-stage label; the variant always agrees with the decision tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerdictLabel {
    Attack(ClassLabel),
    Application(ClassLabel),
}

/// Immutable verdict
///
/// Only constructible through `attack`/`normal`, so an ATTACK verdict always
/// carries an attack label and a NORMAL one an application label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    decision: DecisionTag,
    binary_score: f32,
    label: VerdictLabel,
}

impl Verdict {
    pub fn attack(binary_score: f32, label: ClassLabel) -> Self {
        Self {
            decision: DecisionTag::Attack,
            binary_score,
            label: VerdictLabel::Attack(label),
        }
    }

    pub fn normal(binary_score: f32, label: ClassLabel) -> Self {
        Self {
            decision: DecisionTag::Normal,
            binary_score,
            label: VerdictLabel::Application(label),
        }
    }

    pub fn decision(&self) -> DecisionTag {
        self.decision
    }

    pub fn binary_score(&self) -> f32 {
        self.binary_score
    }

    pub fn label(&self) -> &VerdictLabel {
        &self.label
    }

    pub fn attack_label(&self) -> Option<&ClassLabel> {
        match &self.label {
            VerdictLabel::Attack(l) => Some(l),
            VerdictLabel::Application(_) => None,
        }
    }

    pub fn app_label(&self) -> Option<&ClassLabel> {
        match &self.label {
            VerdictLabel::Application(l) => Some(l),
            VerdictLabel::Attack(_) => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, label) = match &self.label {
            VerdictLabel::Attack(l) => ("attack", l),
            VerdictLabel::Application(l) => ("app", l),
        };
        write!(
            f,
            "{} (score {:.3}, {} {})",
            self.decision, self.binary_score, kind, label.name
        )
    }
}
