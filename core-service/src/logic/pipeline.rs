//! Flow Pipeline - one worker per tailed log
//!
//! line -> FlowRecord -> reconstruct -> impute -> scale -> cascade
//!      -> decision log -> (enforcement)
//!
//! Flows are handled strictly one at a time in arrival order. Per-flow
//! failures are isolated: they become an ERROR row and the worker moves on.
//! A decision log that cannot be written stops the worker, since continuing
//! would silently drop verdicts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::logic::decision::{DecisionLog, LoggedDecision, StorageError};
use crate::logic::features::{
    protocol_code, FeatureReconstructor, FlowIdentity, FlowRecord, SchemaError,
};
use crate::logic::model::cascade::CascadeFault;
use crate::logic::model::{
    CascadeError, CascadeInput, ClassifierCascade, DecisionTag, ImputeError, Imputer, RobustScaler,
    ScalerError, Verdict,
};
use crate::logic::response::{self, EnforcementConnector, EnforcementRequest};

// ============================================================================
// OUTCOMES & ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Blank,
    Malformed(String),
}

/// Coarse class of a failed flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowErrorKind {
    Schema,
    Backend,
}

/// Why a flow's classification was aborted
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Impute(#[from] ImputeError),

    #[error(transparent)]
    Scale(#[from] ScalerError),

    #[error(transparent)]
    Cascade(#[from] CascadeError),
}

impl FlowError {
    pub fn kind(&self) -> FlowErrorKind {
        match self {
            FlowError::Schema(_) | FlowError::Scale(_) => FlowErrorKind::Schema,
            FlowError::Impute(ImputeError::ShapeMismatch { .. } | ImputeError::Schema(_)) => {
                FlowErrorKind::Schema
            }
            FlowError::Impute(_) => FlowErrorKind::Backend,
            FlowError::Cascade(e) => match e.fault {
                CascadeFault::Inference(_) => FlowErrorKind::Backend,
                CascadeFault::Scaler(_) | CascadeFault::Schema(_) => FlowErrorKind::Schema,
            },
        }
    }

    /// Timeouts, transport errors and 5xx from a backend
    pub fn is_transient(&self) -> bool {
        match self {
            FlowError::Impute(e) => e.is_transient(),
            FlowError::Cascade(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Binary score when the cascade got past its first stage
    pub fn binary_score(&self) -> Option<f32> {
        match self {
            FlowError::Cascade(e) => e.binary_score,
            _ => None,
        }
    }
}

/// Result of one line
#[derive(Debug)]
pub enum FlowOutcome {
    Classified {
        verdict: Verdict,
        /// Request handed to the connector, if any
        enforcement: Option<EnforcementRequest>,
    },
    Skipped(SkipReason),
    Failed(FlowError),
}

/// Errors that stop the worker
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Default)]
pub struct PipelineStats {
    lines: AtomicU64,
    classified: AtomicU64,
    attacks: AtomicU64,
    normals: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    enforcement_requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub lines: u64,
    pub classified: u64,
    pub attacks: u64,
    pub normals: u64,
    pub skipped: u64,
    pub errors: u64,
    pub enforcement_requests: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            attacks: self.attacks.load(Ordering::Relaxed),
            normals: self.normals.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            enforcement_requests: self.enforcement_requests.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Caller-side retry for transient backend failures
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub attempts: u32,
    pub backoff: Duration,
}

/// Everything the worker needs, built once at startup
pub struct PipelineParts {
    pub reconstructor: FeatureReconstructor,
    pub imputer: Arc<dyn Imputer>,
    /// 77-wide parameters for the binary/attack classifiers
    pub scaler: Arc<RobustScaler>,
    pub cascade: ClassifierCascade,
    pub decision_log: Arc<DecisionLog>,
    pub enforcement: Option<Arc<dyn EnforcementConnector>>,
    pub block_duration: Duration,
    pub retry: RetryPolicy,
}

pub struct FlowPipeline {
    parts: PipelineParts,
    stats: PipelineStats,
}

impl FlowPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            parts,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle one flow log line end to end
    ///
    /// Only a decision log failure is returned as `Err`.
    pub async fn process_line(&self, line: &str) -> Result<FlowOutcome, PipelineError> {
        PipelineStats::bump(&self.stats.lines);

        if line.trim().is_empty() {
            PipelineStats::bump(&self.stats.skipped);
            return Ok(FlowOutcome::Skipped(SkipReason::Blank));
        }

        let record = match FlowRecord::parse(line) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Skipping malformed flow line: {}", e);
                PipelineStats::bump(&self.stats.skipped);
                return Ok(FlowOutcome::Skipped(SkipReason::Malformed(e.to_string())));
            }
        };
        let identity = record.identity();

        match self.classify_with_retry(&record).await {
            Ok(verdict) => {
                let row = LoggedDecision::from_verdict(&identity, &verdict, Utc::now());
                self.record(&row)?;

                PipelineStats::bump(&self.stats.classified);
                match verdict.decision() {
                    DecisionTag::Attack => {
                        PipelineStats::bump(&self.stats.attacks);
                        log::warn!("[{}] {}", identity, verdict);
                    }
                    DecisionTag::Normal => {
                        PipelineStats::bump(&self.stats.normals);
                        log::info!("[{}] {}", identity, verdict);
                    }
                }

                let enforcement = self.enforce(&identity, &verdict);
                Ok(FlowOutcome::Classified { verdict, enforcement })
            }
            Err(e) => {
                log::warn!("[{}] classification aborted ({:?}): {}", identity, e.kind(), e);
                let row = LoggedDecision::failed(&identity, e.binary_score(), Utc::now());
                self.record(&row)?;

                PipelineStats::bump(&self.stats.errors);
                Ok(FlowOutcome::Failed(e))
            }
        }
    }

    fn record(&self, row: &LoggedDecision) -> Result<(), PipelineError> {
        self.parts.decision_log.append(row).map_err(|e| {
            log::error!("Cannot persist decision: {}", e);
            PipelineError::from(e)
        })
    }

    /// Emit a block request for a logged ATTACK above the enforcement threshold
    fn enforce(&self, identity: &FlowIdentity, verdict: &Verdict) -> Option<EnforcementRequest> {
        let thresholds = self.parts.cascade.thresholds();
        if !thresholds.should_enforce(verdict.decision(), verdict.binary_score()) {
            return None;
        }
        let connector = self.parts.enforcement.as_ref()?;

        let Some(request) = EnforcementRequest::for_flow(identity, self.parts.block_duration) else {
            log::warn!("[{}] cannot enforce: flow has no source/destination address", identity);
            return None;
        };

        PipelineStats::bump(&self.stats.enforcement_requests);
        response::dispatch(Arc::clone(connector), request.clone());
        Some(request)
    }

    async fn classify_with_retry(&self, record: &FlowRecord) -> Result<Verdict, FlowError> {
        let retry = self.parts.retry;
        let mut attempt = 0;
        loop {
            match self.classify(record).await {
                Err(e) if e.is_transient() && attempt < retry.attempts => {
                    attempt += 1;
                    log::warn!(
                        "Transient failure, retrying flow ({}/{}): {}",
                        attempt,
                        retry.attempts,
                        e
                    );
                    tokio::time::sleep(retry.backoff).await;
                }
                result => return result,
            }
        }
    }

    async fn classify(&self, record: &FlowRecord) -> Result<Verdict, FlowError> {
        let parts = &self.parts;
        let schema = parts.reconstructor.schema();

        let partial = parts.reconstructor.reconstruct(record);
        schema.check_len(partial.len())?;

        let dense = parts.imputer.complete(&partial, schema).await?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Imputed features: {}", dense.to_log_entry(schema));
        }
        let scaled = parts.scaler.transform(&dense)?;

        let verdict = parts
            .cascade
            .classify(CascadeInput {
                scaled: &scaled,
                unscaled: &dense,
                protocol_code: protocol_code(record),
            })
            .await?;
        Ok(verdict)
    }

    /// Consume lines until shutdown or until the tailer goes away
    ///
    /// The flow in progress when shutdown arrives is finished; lines still
    /// queued are counted and dropped.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<StatsSnapshot, PipelineError> {
        log::info!("Flow worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                line = rx.recv() => match line {
                    Some(line) => {
                        self.process_line(&line).await?;
                    }
                    None => break,
                },
            }
        }

        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::warn!("Shutdown with {} queued flow line(s) left unclassified", dropped);
        }

        let stats = self.stats();
        log::info!(
            "Flow worker stopped: {} lines, {} classified ({} attack / {} normal), {} skipped, {} errors, {} enforcement requests",
            stats.lines,
            stats.classified,
            stats.attacks,
            stats.normals,
            stats.skipped,
            stats.errors,
            stats.enforcement_requests
        );
        Ok(stats)
    }
}

// ============================================================================
// TESTS
// ============================================================================
