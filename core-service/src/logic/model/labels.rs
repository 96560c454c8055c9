//! Class Labels - decoding classifier predictions into names

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::backend::{flatten_numbers, InferenceError};

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("failed to read class labels {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("class labels {path} are not a JSON array of strings: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decoded class with its probability when the model reported one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub name: String,
    pub probability: Option<f32>,
}

impl ClassLabel {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probability: None,
        }
    }
}

/// Ordered class names of one classifier
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn load(path: &Path) -> Result<Self, LabelError> {
        let content = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let names = serde_json::from_str(&content).map_err(|source| LabelError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name for a class index, `class_<i>` when unnamed
    pub fn name_of(&self, index: usize) -> String {
        self.names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }

    /// Decode one prediction row
    ///
    /// A string is taken verbatim. A probability vector is decoded by arg-max;
    /// ties go to the lowest index.
    pub fn decode(&self, model: &str, prediction: &Value) -> Result<ClassLabel, InferenceError> {
        if let Value::String(name) = prediction {
            return Ok(ClassLabel::named(name.clone()));
        }

        let mut probabilities = Vec::new();
        if !flatten_numbers(prediction, &mut probabilities) || probabilities.is_empty() {
            return Err(InferenceError::malformed(model, "prediction is not a probability vector"));
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(InferenceError::malformed(model, "non-finite class probability"));
        }

        let (index, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Ok(ClassLabel {
            name: self.name_of(index),
            probability: Some(probability),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn attacks() -> LabelSet {
        LabelSet::new(vec!["DDoS".into(), "PortScan".into(), "Bot".into()])
    }

    #[test]
    fn test_argmax_decoding() {
        let label = attacks().decode("attack", &json!([0.1, 0.7, 0.2])).unwrap();
        assert_eq!(label.name, "PortScan");
        assert_eq!(label.probability, Some(0.7));
    }

    #[test]
    fn test_tie_goes_to_first() {
        let label = attacks().decode("attack", &json!([0.4, 0.4, 0.2])).unwrap();
        assert_eq!(label.name, "DDoS");
    }

    #[test]
    fn test_unnamed_index() {
        let label = LabelSet::default().decode("app", &json!([0.0, 0.0, 1.0])).unwrap();
        assert_eq!(label.name, "class_2");
        let label = attacks().decode("attack", &json!([0.0, 0.0, 0.0, 0.9])).unwrap();
        assert_eq!(label.name, "class_3");
    }

    #[test]
    fn test_string_prediction() {
        let label = attacks().decode("attack", &json!("Infiltration")).unwrap();
        assert_eq!(label, ClassLabel::named("Infiltration"));
    }

    #[test]
    fn test_malformed_predictions() {
        assert!(attacks().decode("attack", &json!([])).is_err());
        assert!(attacks().decode("attack", &json!({"p": 1})).is_err());
        assert!(attacks().decode("attack", &json!([0.1, null])).is_err());
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"["HTTP","DNS"]"#).unwrap();
        let set = LabelSet::load(file.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.name_of(1), "DNS");

        assert!(matches!(
            LabelSet::load(Path::new("/nonexistent/labels.json")),
            Err(LabelError::Io { .. })
        ));
    }
}
