//! Flow Service - startup wiring and the daemon lifecycle
//!
//! Every artifact (schema, scaler parameters, label sets, decision log) is
//! loaded and validated before the first line is read. Any failure here is
//! fatal: the daemon refuses to start rather than classify with the wrong
//! layout.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::logic::config::{EnforcementMode, PipelineConfig};
use crate::logic::decision::{DecisionLog, StorageError};
use crate::logic::features::{FeatureReconstructor, FeatureSchema, SchemaError, PROTOCOL_FEATURE};
use crate::logic::model::{
    CascadeModels, ClassifierCascade, ImputeError, Imputer, InferenceBackend, InferenceError,
    LabelError, LabelSet, PolicyThresholds, RemoteImputer, RobustScaler, ScalerError,
    TfServingClient,
};
use crate::logic::pipeline::{FlowPipeline, PipelineError, PipelineParts, RetryPolicy, StatsSnapshot};
use crate::logic::response::{EnforcementConnector, EnforcementError, LogOnlyConnector, RyuConnector};
use crate::logic::tailer::FlowTailer;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("feature schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("scaler: {0}")]
    Scaler(#[from] ScalerError),

    #[error("labels: {0}")]
    Labels(#[from] LabelError),

    #[error("inference client: {0}")]
    Inference(#[from] InferenceError),

    #[error("imputer: {0}")]
    Imputer(#[from] ImputeError),

    #[error("decision log: {0}")]
    Storage(#[from] StorageError),

    #[error("enforcement: {0}")]
    Enforcement(#[from] EnforcementError),
}

/// Tailer plus worker, ready to run
pub struct FlowService {
    tailer: FlowTailer,
    pipeline: FlowPipeline,
    queue_capacity: usize,
}

impl FlowService {
    pub fn build(config: &PipelineConfig) -> Result<Self, StartupError> {
        let schema = Arc::new(match &config.schema_path {
            Some(path) => FeatureSchema::load(path)?,
            None => FeatureSchema::reference(),
        });
        let app_schema = Arc::new(schema.with_appended(PROTOCOL_FEATURE)?);
        log::info!(
            "Feature layout: {} features (hash {:08x}), application layout {} (hash {:08x})",
            schema.len(),
            schema.layout_hash(),
            app_schema.len(),
            app_schema.layout_hash()
        );

        let scaler = Arc::new(RobustScaler::load(
            &config.scaler77_path,
            config.scaler77_sha256.as_deref(),
            schema.clone(),
        )?);
        let app_scaler = Arc::new(RobustScaler::load(
            &config.scaler78_path,
            config.scaler78_sha256.as_deref(),
            app_schema,
        )?);

        let backend: Arc<dyn InferenceBackend> =
            Arc::new(TfServingClient::new(&config.inference_url, config.request_timeout)?);
        let imputer = build_imputer(config, backend.clone())?;

        let attack_labels = load_labels(config.attack_labels_path.as_deref())?;
        let app_labels = load_labels(config.app_labels_path.as_deref())?;

        let cascade = ClassifierCascade::new(
            backend,
            CascadeModels {
                binary: config.binary_model.clone(),
                attack: config.attack_model.clone(),
                application: config.app_model.clone(),
            },
            PolicyThresholds::new(config.binary_threshold, config.enforcement_threshold),
            app_scaler,
            attack_labels,
            app_labels,
        );

        let decision_log = Arc::new(DecisionLog::open(&config.decision_log, config.storage_retries)?);
        log::info!("Writing decisions to {}", decision_log.path().display());

        let enforcement = build_connector(config)?;

        let pipeline = FlowPipeline::new(PipelineParts {
            reconstructor: FeatureReconstructor::new(schema),
            imputer,
            scaler,
            cascade,
            decision_log,
            enforcement,
            block_duration: config.block_duration,
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                backoff: config.retry_backoff,
            },
        });

        let tailer = FlowTailer::new(&config.flow_log, config.poll_interval)
            .with_watch_events(config.watch_events);

        Ok(Self {
            tailer,
            pipeline,
            queue_capacity: config.queue_capacity,
        })
    }

    /// Run until `shutdown` flips or the decision log fails
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<StatsSnapshot, PipelineError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity.max(1));
        let tailer = tokio::spawn(self.tailer.run(tx, shutdown.clone()));

        let result = self.pipeline.run(rx, shutdown).await;
        if result.is_err() {
            tailer.abort();
        }
        let _ = tailer.await;
        result
    }
}

fn load_labels(path: Option<&std::path::Path>) -> Result<LabelSet, LabelError> {
    match path {
        Some(path) => {
            let labels = LabelSet::load(path)?;
            log::info!("Loaded {} class labels from {}", labels.len(), path.display());
            Ok(labels)
        }
        None => Ok(LabelSet::new(Vec::new())),
    }
}

fn build_imputer(
    config: &PipelineConfig,
    backend: Arc<dyn InferenceBackend>,
) -> Result<Arc<dyn Imputer>, ImputeError> {
    match &config.imputer_onnx_path {
        #[cfg(feature = "onnx")]
        Some(path) => {
            let imputer = crate::logic::model::OnnxImputer::load(path, config.request_timeout)?;
            log::info!("Using local ONNX imputer {}", path.display());
            Ok(Arc::new(imputer))
        }
        #[cfg(not(feature = "onnx"))]
        Some(path) => Err(ImputeError::Local(format!(
            "{} is an ONNX model but this build has no `onnx` feature",
            path.display()
        ))),
        None => {
            log::info!("Using served imputer model '{}'", config.imputer_model);
            Ok(Arc::new(RemoteImputer::new(backend, config.imputer_model.clone())))
        }
    }
}

fn build_connector(
    config: &PipelineConfig,
) -> Result<Option<Arc<dyn EnforcementConnector>>, EnforcementError> {
    let connector: Arc<dyn EnforcementConnector> = match config.enforcement {
        EnforcementMode::Off => {
            log::info!("Enforcement disabled");
            return Ok(None);
        }
        EnforcementMode::LogOnly => Arc::new(LogOnlyConnector),
        EnforcementMode::Ryu => Arc::new(RyuConnector::new(
            &config.ryu_url,
            config.ryu_dpid,
            config.request_timeout,
        )?),
    };
    log::info!(
        "Enforcement via '{}' at score >= {}",
        connector.name(),
        config.enforcement_threshold
    );
    Ok(Some(connector))
}
