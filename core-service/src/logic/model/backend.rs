//! Inference Backend - remote model calls
//!
//! TF-Serving REST contract:
//! `POST {base}/{model}:predict` with `{"instances": [[[v1], ..., [vN]]]}`,
//! answered by `{"predictions": [...]}`. A missing `predictions` key is a
//! contract violation and fails the call.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{model}: request timed out after {timeout_ms} ms")]
    Timeout { model: String, timeout_ms: u64 },

    #[error("{model}: transport error: {message}")]
    Transport { model: String, message: String },

    #[error("{model}: HTTP {status}")]
    Status { model: String, status: u16 },

    #[error("{model}: response has no `predictions` field")]
    MissingPredictions { model: String },

    #[error("{model}: malformed response: {message}")]
    Malformed { model: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl InferenceError {
    /// Worth retrying the same flow later (timeouts, connection drops, 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Timeout { .. } | InferenceError::Transport { .. } => true,
            InferenceError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn malformed(model: &str, message: impl Into<String>) -> Self {
        InferenceError::Malformed {
            model: model.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// Anything that can score an `instances` payload with a named model
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Returns the `predictions` array
    async fn predict(&self, model: &str, payload: &Value) -> Result<Vec<Value>, InferenceError>;
}

// ============================================================================
// TF-SERVING CLIENT
// ============================================================================

/// HTTP client for a TF-Serving REST endpoint
pub struct TfServingClient {
    base_url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl TfServingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Client(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http_client,
        })
    }

    pub fn predict_url(&self, model: &str) -> String {
        format!("{}/{}:predict", self.base_url, model)
    }

    fn map_send_error(&self, model: &str, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout {
                model: model.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            InferenceError::Transport {
                model: model.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for TfServingClient {
    async fn predict(&self, model: &str, payload: &Value) -> Result<Vec<Value>, InferenceError> {
        let url = self.predict_url(model);

        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(model, e))?;

        if !response.status().is_success() {
            return Err(InferenceError::Status {
                model: model.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_send_error(model, e)
            } else {
                InferenceError::malformed(model, e.to_string())
            }
        })?;

        extract_predictions(model, body)
    }
}

/// Pull the `predictions` array out of a response body
pub fn extract_predictions(model: &str, body: Value) -> Result<Vec<Value>, InferenceError> {
    let Value::Object(mut fields) = body else {
        return Err(InferenceError::malformed(model, "response is not a JSON object"));
    };

    match fields.remove("predictions") {
        None => Err(InferenceError::MissingPredictions {
            model: model.to_string(),
        }),
        Some(Value::Array(predictions)) if !predictions.is_empty() => Ok(predictions),
        Some(Value::Array(_)) => Err(InferenceError::malformed(model, "empty predictions")),
        Some(_) => Err(InferenceError::malformed(model, "predictions is not an array")),
    }
}

/// First batch item; backends are free to return an empty list
pub fn first_prediction<'a>(model: &str, predictions: &'a [Value]) -> Result<&'a Value, InferenceError> {
    predictions
        .first()
        .ok_or_else(|| InferenceError::malformed(model, "empty predictions"))
}

/// Flatten `[[v], [v], ...]` or `[v, v, ...]` into numbers; `null` becomes NaN
pub fn flatten_numbers(value: &Value, out: &mut Vec<f32>) -> bool {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(v) => {
                out.push(v as f32);
                true
            }
            None => false,
        },
        Value::Null => {
            out.push(f32::NAN);
            true
        }
        Value::Array(items) => items.iter().all(|item| flatten_numbers(item, out)),
        _ => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> Value {
        json!({"instances": [[[0.1], [0.2]]]})
    }

    #[test]
    fn test_extract_predictions() {
        let preds = extract_predictions("m", json!({"predictions": [[0.9]]})).unwrap();
        assert_eq!(preds, vec![json!([0.9])]);

        assert!(matches!(
            extract_predictions("m", json!({"outputs": [[0.9]]})),
            Err(InferenceError::MissingPredictions { .. })
        ));
        assert!(matches!(
            extract_predictions("m", json!({"predictions": []})),
            Err(InferenceError::Malformed { .. })
        ));
        assert!(matches!(
            extract_predictions("m", json!([1, 2])),
            Err(InferenceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_flatten_numbers() {
        let mut out = Vec::new();
        assert!(flatten_numbers(&json!([[1.0], [2.0], [null]]), &mut out));
        assert_eq!(out.len(), 3);
        assert!(out[2].is_nan());

        let mut out = Vec::new();
        assert!(!flatten_numbers(&json!([[1.0], ["x"]]), &mut out));
    }

    #[test]
    fn test_transient_classification() {
        let timeout = InferenceError::Timeout { model: "m".into(), timeout_ms: 1 };
        let bad_gateway = InferenceError::Status { model: "m".into(), status: 502 };
        let not_found = InferenceError::Status { model: "m".into(), status: 404 };
        assert!(timeout.is_transient());
        assert!(bad_gateway.is_transient());
        assert!(!not_found.is_transient());
        assert!(!InferenceError::MissingPredictions { model: "m".into() }.is_transient());
    }

    #[tokio::test]
    async fn test_predict_posts_instances() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models/binary_classifier:predict"))
            .and(body_json(payload()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"predictions": [[0.42]]})))
            .expect(1)
            .mount(&server)
            .await;

        let client = TfServingClient::new(
            &format!("{}/v1/models/", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();
        let preds = client.predict("binary_classifier", &payload()).await.unwrap();
        assert_eq!(preds, vec![json!([0.42])]);
    }

    #[tokio::test]
    async fn test_predict_missing_field_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "oops"})))
            .mount(&server)
            .await;

        let client = TfServingClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let err = client.predict("m", &payload()).await.unwrap_err();
        assert!(matches!(err, InferenceError::MissingPredictions { .. }));
    }

    #[tokio::test]
    async fn test_predict_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = TfServingClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let err = client.predict("m", &payload()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_predict_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"predictions": [[0.1]]}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = TfServingClient::new(&server.uri(), Duration::from_millis(50)).unwrap();
        let err = client.predict("m", &payload()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Timeout { .. }), "{:?}", err);
    }
}
