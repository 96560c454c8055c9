//! FlowGuard Core - flow classification pipeline
//!
//! Tails a Zeek flow log, classifies each flow through a served model
//! cascade, logs every decision and optionally blocks attacking pairs.

pub mod constants;
pub mod logic;

pub use logic::config::PipelineConfig;
pub use logic::service::{FlowService, StartupError};
