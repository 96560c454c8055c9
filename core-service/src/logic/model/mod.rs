//! Model Module - imputation, scaling and the classifier cascade
//!
//! Inference runs behind `InferenceBackend`, so the served models can be
//! swapped without touching the cascade.

pub mod backend;
pub mod cascade;
pub mod imputer;
pub mod labels;
pub mod scaler;
pub mod threshold;
pub mod verdict;

// Re-export common types
pub use backend::{InferenceBackend, InferenceError, TfServingClient};
pub use cascade::{CascadeError, CascadeInput, CascadeModels, CascadeStage, ClassifierCascade};
pub use imputer::{fill_missing, ImputeError, Imputer, RemoteImputer};
pub use labels::{ClassLabel, LabelError, LabelSet};
pub use scaler::{RobustScaler, ScalerError, ScalerParams};
pub use threshold::PolicyThresholds;
pub use verdict::{DecisionTag, Verdict, VerdictLabel};

#[cfg(feature = "onnx")]
pub use imputer::OnnxImputer;
