//! Response Module - enforcement hand-off
//!
//! Enforcement is a side effect of an already logged ATTACK verdict. Requests
//! are dispatched on their own task; the result is logged and never fed back
//! into classification.
//!
//! # Connectors
//! - `LogOnlyConnector`: dry run, logs what would be blocked
//! - `ryu.rs`: OpenFlow drop rule through a Ryu controller

pub mod ryu;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::task::JoinHandle;

pub use ryu::RyuConnector;
pub use types::{EnforcementError, EnforcementOutcome, EnforcementRequest, EnforcementStatus};

// ============================================================================
// CONNECTOR TRAIT
// ============================================================================

#[async_trait]
pub trait EnforcementConnector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn block(&self, request: &EnforcementRequest) -> Result<EnforcementOutcome, EnforcementError>;
}

/// Dry-run connector
pub struct LogOnlyConnector;

#[async_trait]
impl EnforcementConnector for LogOnlyConnector {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn block(&self, request: &EnforcementRequest) -> Result<EnforcementOutcome, EnforcementError> {
        let start = Instant::now();
        log::warn!("[dry-run] {}", request.description());
        Ok(EnforcementOutcome::new(
            request.clone(),
            EnforcementStatus::DryRun,
            start.elapsed().as_millis() as u64,
        ))
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Fire-and-forget: run the request on its own task and log the result
pub fn dispatch(connector: Arc<dyn EnforcementConnector>, request: EnforcementRequest) -> JoinHandle<()> {
    tokio::spawn(async move {
        match connector.block(&request).await {
            Ok(outcome) => match outcome.status {
                EnforcementStatus::Applied => {
                    log::warn!("[{}] {} ({} ms)", connector.name(), outcome.message, outcome.duration_ms)
                }
                _ => log::info!("[{}] {}", connector.name(), outcome.message),
            },
            Err(e) => log::warn!(
                "[{}] enforcement failed for {} -> {}: {}",
                connector.name(),
                request.src,
                request.dst,
                e
            ),
        }
    })
}
