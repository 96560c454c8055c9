//! Robust Scaler - frozen median/IQR normalization
//!
//! Parameters are exported offline from the fitted scaler and loaded once at
//! startup: `x' = (x - center) / scale`. Nothing in here fits parameters.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::logic::features::{FeatureSchema, FeatureVector, SchemaError};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("failed to read scaler parameters {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scaler parameters {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Checksum {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("scaler {what} has {actual} entries, schema expects {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("scaler feature #{index} is {found}, schema expects {expected}")]
    FeatureName {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("scaler {what} #{index} is not finite")]
    NonFinite { what: &'static str, index: usize },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// On-disk parameter file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    /// Per-feature median
    pub center: Vec<f32>,
    /// Per-feature interquartile range
    pub scale: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_names: Option<Vec<String>>,
}

// ============================================================================
// SCALER
// ============================================================================

/// Immutable robust scaler bound to one schema
#[derive(Debug, Clone)]
pub struct RobustScaler {
    center: Vec<f32>,
    scale: Vec<f32>,
    schema: Arc<FeatureSchema>,
}

impl RobustScaler {
    pub fn from_params(params: ScalerParams, schema: Arc<FeatureSchema>) -> Result<Self, ScalerError> {
        let expected = schema.len();
        for (what, values) in [("center", &params.center), ("scale", &params.scale)] {
            if values.len() != expected {
                return Err(ScalerError::LengthMismatch {
                    what,
                    expected,
                    actual: values.len(),
                });
            }
            if let Some(index) = values.iter().position(|v| !v.is_finite()) {
                return Err(ScalerError::NonFinite { what, index });
            }
        }

        if let Some(names) = &params.feature_names {
            if names.len() != expected {
                return Err(ScalerError::LengthMismatch {
                    what: "feature_names",
                    expected,
                    actual: names.len(),
                });
            }
            for (index, (found, wanted)) in names.iter().zip(schema.names()).enumerate() {
                if found != wanted {
                    return Err(ScalerError::FeatureName {
                        index,
                        expected: wanted.clone(),
                        found: found.clone(),
                    });
                }
            }
        }

        // Constant features were fitted with scale 0; the fitting tool divides by 1
        let scale = params
            .scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();

        Ok(Self {
            center: params.center,
            scale,
            schema,
        })
    }

    /// Load a parameter file, verifying its SHA-256 first when a pin is given
    pub fn load(
        path: &Path,
        expected_sha256: Option<&str>,
        schema: Arc<FeatureSchema>,
    ) -> Result<Self, ScalerError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| ScalerError::Io {
            path: display.clone(),
            source,
        })?;

        if let Some(expected) = expected_sha256 {
            let actual = hex::encode(Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(ScalerError::Checksum {
                    path: display,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let params: ScalerParams =
            serde_json::from_slice(&bytes).map_err(|source| ScalerError::Parse {
                path: display.clone(),
                source,
            })?;

        let scaler = Self::from_params(params, schema)?;
        log::info!(
            "Loaded scaler parameters from {} ({} features, layout {:08x})",
            display,
            scaler.len(),
            scaler.schema.layout_hash()
        );
        Ok(scaler)
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.center.len()
    }

    pub fn is_empty(&self) -> bool {
        self.center.is_empty()
    }

    /// Normalize one dense vector of the scaler's width
    pub fn transform(&self, vector: &FeatureVector) -> Result<FeatureVector, ScalerError> {
        self.schema.check_len(vector.len())?;

        let scaled = vector
            .as_slice()
            .iter()
            .zip(self.center.iter().zip(&self.scale))
            .map(|(x, (c, s))| ((x - c) / s).clamp(f32::MIN, f32::MAX))
            .collect();

        Ok(FeatureVector::from_values(scaled, &self.schema)?)
    }
}

// ============================================================================
// TESTS
// ============================================================================
