//! FlowGuard - flow classification daemon

use std::process::ExitCode;

use flowguard_core::constants::{APP_NAME, APP_VERSION};
use flowguard_core::{FlowService, PipelineConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}", APP_NAME, APP_VERSION);

    let config = match PipelineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let service = match FlowService::build(&config) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            return ExitCode::from(2);
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
            let _ = stop_tx.send(true);
        }
    });

    match service.run(stop_rx).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Flow worker stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
