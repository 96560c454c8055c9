//! Feature Vector - Core data structure for ML input
//!
//! Two shapes travel through the pipeline:
//! - `PartialVector`: straight out of reconstruction, Group C entries missing
//! - `FeatureVector`: dense, every entry a finite number
//!
//! Both follow the order of the `FeatureSchema` they were built for.
//! Models take a single-item, single-channel sequence, so vectors are sent
//! as a `(1, N, 1)` tensor.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::layout::{FeatureSchema, SchemaError};

// ============================================================================
// PARTIAL VECTOR
// ============================================================================

/// Vector with missing (to be imputed) entries
///
/// `None` is the missing sentinel: it is never confused with a computed 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialVector {
    values: Vec<Option<f32>>,
}

impl PartialVector {
    pub fn new(values: Vec<Option<f32>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<f32>] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<Option<f32>> {
        self.values.get(index).copied()
    }

    pub fn is_missing(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(None))
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// `(1, N, 1)` tensor with NaN in missing slots
    pub fn to_tensor(&self) -> Array3<f32> {
        let data: Vec<f32> = self.values.iter().map(|v| v.unwrap_or(f32::NAN)).collect();
        sequence_tensor(data)
    }

    /// `{"instances": ...}` body; missing entries become `null` (JSON has no NaN)
    pub fn instances_payload(&self) -> Value {
        instances_payload(&self.to_tensor())
    }
}

// ============================================================================
// DENSE FEATURE VECTOR
// ============================================================================

/// Dense vector, length checked against a schema on construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    /// Create from raw values, rejecting a length the schema does not expect
    pub fn from_values(values: Vec<f32>, schema: &FeatureSchema) -> Result<Self, SchemaError> {
        schema.check_len(values.len())?;
        Ok(Self { values })
    }

    /// New vector with one more value at the end (77 -> 78 for the app model)
    pub fn appended(&self, value: f32, schema: &FeatureSchema) -> Result<Self, SchemaError> {
        let mut values = self.values.clone();
        values.push(value);
        Self::from_values(values, schema)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    pub fn to_tensor(&self) -> Array3<f32> {
        sequence_tensor(self.values.clone())
    }

    pub fn instances_payload(&self) -> Value {
        instances_payload(&self.to_tensor())
    }

    /// Convert to JSON-serializable format for debug logging
    pub fn to_log_entry(&self, schema: &FeatureSchema) -> Value {
        json!({
            "layout_hash": schema.layout_hash(),
            "named_values": schema.names().iter()
                .zip(self.values.iter())
                .map(|(name, value)| (name.clone(), *value))
                .collect::<std::collections::BTreeMap<_, _>>(),
        })
    }
}

// ============================================================================
// TENSOR HELPERS
// ============================================================================

/// Reshape N values into one batch item of N timesteps with 1 channel
pub fn sequence_tensor(data: Vec<f32>) -> Array3<f32> {
    let n = data.len();
    Array3::from_shape_vec((1, n, 1), data)
        .unwrap_or_else(|_| unreachable!("(1, n, 1) always holds n values"))
}

/// `{"instances": [[[v1], [v2], ...]]}` with non-finite values as `null`
pub fn instances_payload(tensor: &Array3<f32>) -> Value {
    let batch: Vec<Vec<Vec<Option<f32>>>> = tensor
        .outer_iter()
        .map(|item| {
            item.outer_iter()
                .map(|step| step.iter().map(|v| v.is_finite().then_some(*v)).collect())
                .collect()
        })
        .collect();

    json!({ "instances": batch })
}

// ============================================================================
// TESTS
// ============================================================================
