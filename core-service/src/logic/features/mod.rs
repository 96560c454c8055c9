//! Features Module - Feature Reconstruction Engine
//!
//! Turns one flow record into a schema-ordered vector: computed values for
//! Group A, missing markers for Group C.

pub mod layout;
pub mod protocol;
pub mod reconstruct;
pub mod record;
pub mod vector;

#[cfg(test)]
mod tests;

// Re-export common types
pub use layout::{FeatureSchema, SchemaError, PROTOCOL_FEATURE, REFERENCE_FEATURE_COUNT};
pub use protocol::protocol_code;
pub use reconstruct::{safe_div, FeatureReconstructor, FlowCounters};
pub use record::{FlowIdentity, FlowRecord, RecordError};
pub use vector::{FeatureVector, PartialVector};
