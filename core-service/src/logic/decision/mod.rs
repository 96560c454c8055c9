//! Decision Module - durable record of every classified flow
//!
//! One CSV row per flow, no header, never rewritten:
//! `timestamp,src,dst,decision,binary_score,attack_label,app_label`.
//! The reporting side only reads the tail of the same file.

pub mod csv;
pub mod reader;
pub mod record;
pub mod writer;

#[cfg(test)]
mod tests;

pub use reader::{recent_decisions, ReportRow};
pub use record::{LoggedDecision, LoggedTag};
pub use writer::{DecisionLog, StorageError};
