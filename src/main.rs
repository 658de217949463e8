use clap::Parser;
use std::process::ExitCode;
use tokio::sync::watch;

use plus_scraper::{app_state::AppState, cli::Cli, config::AppConfig, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration from environment
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing(cli.debug, false);
            tracing::error!(error = %e, "Failed to load configuration from environment");
            return ExitCode::FAILURE;
        }
    };

    // Initialize structured logging
    telemetry::init_tracing(cli.debug, config.log_json);

    if let Err(e) = telemetry::init_metrics(config.metrics_addr) {
        tracing::error!(error = %e, "Failed to install Prometheus metrics recorder");
        return ExitCode::FAILURE;
    }

    tracing::info!("PLUS product scraper");

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize storage");
            return ExitCode::FAILURE;
        }
    };

    // Ctrl+C flips the shutdown flag; the pipeline finalizes and exits normally.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current item");
            let _ = shutdown_tx.send(true);
        }
    });

    let params = cli.run_params();
    let pipeline = match state.pipeline(&params.mode, shutdown_rx).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, mode = %params.mode, "Failed to set up pipeline");
            return ExitCode::FAILURE;
        }
    };

    match pipeline.run(params).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}
