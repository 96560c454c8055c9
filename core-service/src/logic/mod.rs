//! Logic Module - the flow classification pipeline
//!
//! ## Architecture
//! - `tailer` - follows the flow log, one line per flow
//! - `features/` - record parsing, feature layout and reconstruction
//! - `model/` - imputation, scaling and the classifier cascade
//! - `decision/` - append-only decision log and its reader
//! - `response/` - enforcement connectors
//! - `pipeline` - per-flow orchestration
//! - `service` - startup wiring

pub mod config;
pub mod decision;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod response;
pub mod service;
pub mod tailer;
