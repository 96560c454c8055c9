//! Flow Record - one parsed line of the flow log
//!
//! Zeek writes `conn.log` as one JSON object per line. Unknown fields are
//! ignored; missing or mistyped numeric fields read as zero.

use serde_json::{Map, Value};
use thiserror::Error;

// Zeek conn.log keys
pub const FIELD_DURATION: &str = "duration";
pub const FIELD_ORIG_PKTS: &str = "orig_pkts";
pub const FIELD_RESP_PKTS: &str = "resp_pkts";
pub const FIELD_ORIG_BYTES: &str = "orig_ip_bytes";
pub const FIELD_RESP_BYTES: &str = "resp_ip_bytes";
pub const FIELD_RESP_PORT: &str = "id.resp_p";
pub const FIELD_ORIG_WINDOW: &str = "orig_window";
pub const FIELD_RESP_WINDOW: &str = "resp_window";
pub const FIELD_ORIG_HOST: &str = "id.orig_h";
pub const FIELD_RESP_HOST: &str = "id.resp_h";
pub const FIELD_PROTO: &str = "proto";
pub const FIELD_SERVICE: &str = "service";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("flow line is not a JSON object")]
    NotAnObject,
}

/// One flow, immutable once parsed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowRecord {
    fields: Map<String, Value>,
}

impl FlowRecord {
    /// Parse one flow log line
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        match serde_json::from_str::<Value>(line)? {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Integer field, 0 when absent or not numeric
    ///
    /// Integral floats (`12.0`) are accepted, fractional ones are truncated.
    pub fn int_field(&self, key: &str) -> i64 {
        match self.fields.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|v| v.min(i64::MAX as u64) as i64))
                .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Float field, 0.0 when absent or not numeric
    pub fn float_field(&self, key: &str) -> f64 {
        match self.fields.get(key) {
            Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Originator address
    pub fn src_addr(&self) -> Option<&str> {
        self.str_field(FIELD_ORIG_HOST).filter(|s| !s.is_empty())
    }

    /// Responder address
    pub fn dst_addr(&self) -> Option<&str> {
        self.str_field(FIELD_RESP_HOST).filter(|s| !s.is_empty())
    }

    pub fn identity(&self) -> FlowIdentity {
        FlowIdentity {
            src: self.src_addr().map(str::to_string),
            dst: self.dst_addr().map(str::to_string),
        }
    }
}

/// Source/destination pair a decision is attached to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowIdentity {
    pub src: Option<String>,
    pub dst: Option<String>,
}

impl std::fmt::Display for FlowIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{}",
            self.src.as_deref().unwrap_or("?"),
            self.dst.as_deref().unwrap_or("?")
        )
    }
}
