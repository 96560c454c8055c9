//! Classifier Cascade
//!
//! ```text
//! START --binary--> BINARY_SCORED --p > t--> ATTACK_SCORED --> DONE
//!                                 \--p <= t-> APP_SCORED ----> DONE
//! any stage --failure--> ERROR
//! ```
//!
//! The attack classifier sees the same scaled 77-vector as the binary one.
//! The application classifier sees the unscaled vector with the protocol code
//! appended, scaled with the 78-wide parameters. No retries in here.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::backend::{first_prediction, flatten_numbers, InferenceBackend, InferenceError};
use super::labels::LabelSet;
use super::scaler::{RobustScaler, ScalerError};
use super::threshold::PolicyThresholds;
use super::verdict::{DecisionTag, Verdict};
use crate::logic::features::{FeatureVector, SchemaError};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeStage {
    Binary,
    Attack,
    Application,
}

impl fmt::Display for CascadeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CascadeStage::Binary => "binary",
            CascadeStage::Attack => "attack",
            CascadeStage::Application => "application",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CascadeFault {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Scaler(#[from] ScalerError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Terminal ERROR state
#[derive(Debug, Error)]
#[error("{stage} classifier stage failed: {fault}")]
pub struct CascadeError {
    pub stage: CascadeStage,
    /// Set once the binary stage completed
    pub binary_score: Option<f32>,
    #[source]
    pub fault: CascadeFault,
}

impl CascadeError {
    fn at(stage: CascadeStage, binary_score: Option<f32>) -> impl FnOnce(CascadeFault) -> Self {
        move |fault| Self {
            stage,
            binary_score,
            fault,
        }
    }

    pub fn is_transient(&self) -> bool {
        match &self.fault {
            CascadeFault::Inference(e) => e.is_transient(),
            _ => false,
        }
    }
}

// ============================================================================
// CASCADE
// ============================================================================

/// Served model names
#[derive(Debug, Clone)]
pub struct CascadeModels {
    pub binary: String,
    pub attack: String,
    pub application: String,
}

/// One flow's vectors as the cascade needs them
pub struct CascadeInput<'a> {
    /// Imputed and scaled with the 77-wide parameters
    pub scaled: &'a FeatureVector,
    /// Imputed, before scaling
    pub unscaled: &'a FeatureVector,
    pub protocol_code: f32,
}

pub struct ClassifierCascade {
    backend: Arc<dyn InferenceBackend>,
    models: CascadeModels,
    thresholds: PolicyThresholds,
    app_scaler: Arc<RobustScaler>,
    attack_labels: LabelSet,
    app_labels: LabelSet,
}

impl ClassifierCascade {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        models: CascadeModels,
        thresholds: PolicyThresholds,
        app_scaler: Arc<RobustScaler>,
        attack_labels: LabelSet,
        app_labels: LabelSet,
    ) -> Self {
        Self {
            backend,
            models,
            thresholds,
            app_scaler,
            attack_labels,
            app_labels,
        }
    }

    pub fn thresholds(&self) -> &PolicyThresholds {
        &self.thresholds
    }

    /// Run the cascade for one flow
    pub async fn classify(&self, input: CascadeInput<'_>) -> Result<Verdict, CascadeError> {
        // START -> BINARY_SCORED
        let payload = input.scaled.instances_payload();
        let score = self
            .score_binary(&payload)
            .await
            .map_err(|e| CascadeError::at(CascadeStage::Binary, None)(e.into()))?;

        let decision = self.thresholds.decide(score);
        log::debug!("Binary score {:.4} -> {}", score, decision);

        match decision {
            // BINARY_SCORED -> ATTACK_SCORED
            DecisionTag::Attack => {
                let label = self
                    .predict_label(&self.models.attack, &payload, &self.attack_labels)
                    .await
                    .map_err(|e| CascadeError::at(CascadeStage::Attack, Some(score))(e.into()))?;
                Ok(Verdict::attack(score, label))
            }
            // BINARY_SCORED -> APP_SCORED
            DecisionTag::Normal => {
                let fail = CascadeError::at(CascadeStage::Application, Some(score));
                let app_payload = match self.app_payload(&input) {
                    Ok(p) => p,
                    Err(fault) => return Err(fail(fault)),
                };
                let label = match self
                    .predict_label(&self.models.application, &app_payload, &self.app_labels)
                    .await
                {
                    Ok(l) => l,
                    Err(e) => return Err(fail(e.into())),
                };
                Ok(Verdict::normal(score, label))
            }
        }
    }

    async fn score_binary(&self, payload: &Value) -> Result<f32, InferenceError> {
        let predictions = self.backend.predict(&self.models.binary, payload).await?;
        binary_probability(&self.models.binary, first_prediction(&self.models.binary, &predictions)?)
    }

    async fn predict_label(
        &self,
        model: &str,
        payload: &Value,
        labels: &LabelSet,
    ) -> Result<super::labels::ClassLabel, InferenceError> {
        let predictions = self.backend.predict(model, payload).await?;
        labels.decode(model, first_prediction(model, &predictions)?)
    }

    /// 77 unscaled + protocol code -> 78, scaled with the application parameters
    fn app_payload(&self, input: &CascadeInput<'_>) -> Result<Value, CascadeFault> {
        let wide = input
            .unscaled
            .appended(input.protocol_code, self.app_scaler.schema())?;
        let scaled = self.app_scaler.transform(&wide)?;
        Ok(scaled.instances_payload())
    }
}

/// Probability from `[p]`, `[[p]]` or `p`; must be finite and within [0, 1]
pub fn binary_probability(model: &str, prediction: &Value) -> Result<f32, InferenceError> {
    let mut values = Vec::with_capacity(1);
    if !flatten_numbers(prediction, &mut values) {
        return Err(InferenceError::malformed(model, "binary prediction is not numeric"));
    }

    match values.first() {
        Some(p) if p.is_finite() && (0.0..=1.0).contains(p) => Ok(*p),
        Some(p) => Err(InferenceError::malformed(
            model,
            format!("binary probability {} outside [0, 1]", p),
        )),
        None => Err(InferenceError::malformed(model, "empty binary prediction")),
    }
}

// ============================================================================
// TESTS
// ============================================================================
