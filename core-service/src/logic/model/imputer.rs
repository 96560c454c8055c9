//! Imputer - fills Group C entries of a reconstructed vector
//!
//! The model sees the whole `(1, N, 1)` sequence. Its output is only trusted
//! for the missing slots: computed entries are copied from the input, so a
//! model that perturbs them cannot leak into classification.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::backend::{first_prediction, flatten_numbers, InferenceBackend, InferenceError};
use crate::logic::features::{FeatureSchema, FeatureVector, PartialVector, SchemaError};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum ImputeError {
    #[error("imputation backend failed: {0}")]
    Backend(#[from] InferenceError),

    #[error("imputer returned {actual} values, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("imputer produced a non-finite value for feature #{index}")]
    NonFinite { index: usize },

    #[error("local imputer timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("local imputer failed: {0}")]
    Local(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ImputeError {
    pub fn is_transient(&self) -> bool {
        match self {
            ImputeError::Backend(e) => e.is_transient(),
            ImputeError::Timeout { .. } => true,
            _ => false,
        }
    }
}

// ============================================================================
// IMPUTER TRAIT
// ============================================================================

/// Produces raw model output for a partial vector
#[async_trait]
pub trait Imputer: Send + Sync {
    /// One value per input entry, in input order
    async fn impute(&self, partial: &PartialVector) -> Result<Vec<f32>, ImputeError>;

    /// Impute and merge into a dense vector for `schema`
    async fn complete(
        &self,
        partial: &PartialVector,
        schema: &FeatureSchema,
    ) -> Result<FeatureVector, ImputeError> {
        let output = self.impute(partial).await?;
        fill_missing(partial, &output, schema)
    }
}

/// Merge model output into the partial vector
///
/// Present entries are kept as-is; only missing entries take the model value,
/// which must be finite.
pub fn fill_missing(
    partial: &PartialVector,
    output: &[f32],
    schema: &FeatureSchema,
) -> Result<FeatureVector, ImputeError> {
    if output.len() != partial.len() {
        return Err(ImputeError::ShapeMismatch {
            expected: partial.len(),
            actual: output.len(),
        });
    }

    let mut values = Vec::with_capacity(partial.len());
    for (index, (known, imputed)) in partial.values().iter().zip(output).enumerate() {
        match known {
            Some(v) => values.push(*v),
            None if imputed.is_finite() => values.push(*imputed),
            None => return Err(ImputeError::NonFinite { index }),
        }
    }

    Ok(FeatureVector::from_values(values, schema)?)
}

// ============================================================================
// REMOTE IMPUTER
// ============================================================================

/// Imputation model served behind an `InferenceBackend`
pub struct RemoteImputer {
    backend: Arc<dyn InferenceBackend>,
    model: String,
}

impl RemoteImputer {
    pub fn new(backend: Arc<dyn InferenceBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Imputer for RemoteImputer {
    async fn impute(&self, partial: &PartialVector) -> Result<Vec<f32>, ImputeError> {
        let predictions = self
            .backend
            .predict(&self.model, &partial.instances_payload())
            .await?;

        // Single batch item
        let mut output = Vec::with_capacity(partial.len());
        if !flatten_numbers(first_prediction(&self.model, &predictions)?, &mut output) {
            return Err(InferenceError::malformed(&self.model, "non-numeric imputation output").into());
        }
        Ok(output)
    }
}

// ============================================================================
// LOCAL ONNX IMPUTER
// ============================================================================

#[cfg(feature = "onnx")]
pub use onnx::OnnxImputer;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use ndarray::Array3;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Value;
    use parking_lot::Mutex;

    use super::{ImputeError, Imputer};
    use crate::logic::features::PartialVector;

    /// ONNX Runtime session fed NaN for missing entries
    pub struct OnnxImputer {
        session: Arc<Mutex<Session>>,
        output_name: String,
        timeout: Duration,
    }

    impl OnnxImputer {
        pub fn load(model_path: &Path, timeout: Duration) -> Result<Self, ImputeError> {
            log::info!("Loading ONNX imputer from: {}", model_path.display());

            if !model_path.exists() {
                return Err(ImputeError::Local(format!(
                    "model not found: {}",
                    model_path.display()
                )));
            }

            let session = Session::builder()
                .map_err(|e| ImputeError::Local(format!("session builder error: {}", e)))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| ImputeError::Local(format!("optimization error: {}", e)))?
                .commit_from_file(model_path)
                .map_err(|e| ImputeError::Local(format!("failed to load model: {}", e)))?;

            let output_name = session
                .outputs
                .first()
                .map(|o| o.name.clone())
                .ok_or_else(|| ImputeError::Local("model defines no output".to_string()))?;

            Ok(Self {
                session: Arc::new(Mutex::new(session)),
                output_name,
                timeout,
            })
        }
    }

    fn run_session(
        session: &Mutex<Session>,
        output_name: &str,
        tensor: Array3<f32>,
    ) -> Result<Vec<f32>, ImputeError> {
        let input = Value::from_array(tensor)
            .map_err(|e| ImputeError::Local(format!("tensor error: {}", e)))?;

        let mut session = session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ImputeError::Local(format!("inference failed: {}", e)))?;

        let output = outputs
            .get(output_name)
            .ok_or_else(|| ImputeError::Local(format!("missing output {}", output_name)))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ImputeError::Local(format!("extract error: {}", e)))?;

        Ok(data.to_vec())
    }

    #[async_trait]
    impl Imputer for OnnxImputer {
        async fn impute(&self, partial: &PartialVector) -> Result<Vec<f32>, ImputeError> {
            let session = Arc::clone(&self.session);
            let output_name = self.output_name.clone();
            let tensor = partial.to_tensor();

            let task = tokio::task::spawn_blocking(move || {
                run_session(&session, &output_name, tensor)
            });

            match tokio::time::timeout(self.timeout, task).await {
                Err(_) => Err(ImputeError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
                Ok(Err(join_error)) => Err(ImputeError::Local(join_error.to_string())),
                Ok(Ok(result)) => result,
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;

    use crate::logic::model::backend::TfServingClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schema(n: usize) -> FeatureSchema {
        FeatureSchema::from_names((0..n).map(|i| format!("f{}", i)).collect()).unwrap()
    }

    /// Returns a fixed output regardless of input
    struct FixedImputer(Vec<f32>);

    #[async_trait]
    impl Imputer for FixedImputer {
        async fn impute(&self, _partial: &PartialVector) -> Result<Vec<f32>, ImputeError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_remote_imputer_empty_predictions() {
        struct EmptyBackend;

        #[async_trait]
        impl InferenceBackend for EmptyBackend {
            async fn predict(&self, _model: &str, _payload: &Value) -> Result<Vec<Value>, InferenceError> {
                Ok(Vec::new())
            }
        }

        let imputer = RemoteImputer::new(Arc::new(EmptyBackend), "imputer");
        let err = imputer.impute(&PartialVector::new(vec![None, Some(1.0)])).await.unwrap_err();
        assert!(matches!(err, ImputeError::Backend(InferenceError::Malformed { .. })));
    }

    #[test]
    fn test_fill_missing_keeps_known_values() {
        let partial = PartialVector::new(vec![Some(1.0), None, Some(3.0), None]);
        // Model "perturbs" known entries 0 and 2
        let output = [9.0, 20.0, 9.0, 40.0];

        let dense = fill_missing(&partial, &output, &schema(4)).unwrap();
        assert_eq!(dense.as_slice(), &[1.0, 20.0, 3.0, 40.0]);
    }

    #[test]
    fn test_fill_missing_rejects_bad_shape() {
        let partial = PartialVector::new(vec![Some(1.0), None]);
        let err = fill_missing(&partial, &[1.0, 2.0, 3.0], &schema(2)).unwrap_err();
        assert!(matches!(err, ImputeError::ShapeMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_fill_missing_rejects_nan_in_missing_slot() {
        let partial = PartialVector::new(vec![Some(1.0), None]);
        let err = fill_missing(&partial, &[1.0, f32::NAN], &schema(2)).unwrap_err();
        assert!(matches!(err, ImputeError::NonFinite { index: 1 }));

        // NaN over a known slot is ignored
        let partial = PartialVector::new(vec![Some(1.0), None]);
        assert!(fill_missing(&partial, &[f32::NAN, 2.0], &schema(2)).is_ok());
    }

    #[tokio::test]
    async fn test_complete_uses_schema_length() {
        let imputer = FixedImputer(vec![0.5, 0.5, 0.5]);
        let partial = PartialVector::new(vec![None, Some(2.0), None]);

        let dense = imputer.complete(&partial, &schema(3)).await.unwrap();
        assert_eq!(dense.as_slice(), &[0.5, 2.0, 0.5]);

        let err = imputer.complete(&partial, &schema(4)).await.unwrap_err();
        assert!(matches!(err, ImputeError::Schema(_)));
    }

    #[tokio::test]
    async fn test_remote_imputer_sends_nulls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/imputer:predict"))
            .and(wiremock::matchers::body_json(json!({"instances": [[[1.0], [null]]]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"predictions": [[[0.0], [7.5]]]})),
            )
            .mount(&server)
            .await;

        let backend = Arc::new(TfServingClient::new(&server.uri(), Duration::from_secs(2)).unwrap());
        let imputer = RemoteImputer::new(backend, "imputer");
        let partial = PartialVector::new(vec![Some(1.0), None]);

        let dense = imputer.complete(&partial, &schema(2)).await.unwrap();
        assert_eq!(dense.as_slice(), &[1.0, 7.5]);
    }

    #[tokio::test]
    async fn test_remote_imputer_rejects_strings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"predictions": [["a", "b"]]})),
            )
            .mount(&server)
            .await;

        let backend = Arc::new(TfServingClient::new(&server.uri(), Duration::from_secs(2)).unwrap());
        let imputer = RemoteImputer::new(backend, "imputer");
        let err = imputer
            .impute(&PartialVector::new(vec![None, None]))
            .await
            .unwrap_err();
        assert!(matches!(err, ImputeError::Backend(InferenceError::Malformed { .. })));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_passthrough() {
        let err: ImputeError = InferenceError::Timeout { model: "imputer".into(), timeout_ms: 5 }.into();
        assert!(err.is_transient());
    }
}
