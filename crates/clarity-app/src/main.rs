//! Clarity application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Open the database (one handle per writer plus a read handle)
//! 3. Build the capture, summary and daily pipelines
//! 4. Serve the command API until Ctrl-C, then stop recording

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use clarity_api::auth::{load_or_generate_token, TOKEN_FILE};
use clarity_api::AppState;
use clarity_capture::{CaptureService, MockCaptureService, WindowsCaptureService};
use clarity_core::config::ClarityConfig;
use clarity_pipeline::{Capabilities, Databases, PipelineRuntime};
use clarity_vision::{FfmpegEncoder, GeminiTransport};

use cli::CliArgs;

fn init_tracing(cli_level: Option<String>, config_level: &str) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    // Config is read before tracing exists; problems are reported after init.
    let config_path = cli.resolve_config_path();
    let (config, config_error) = if config_path.exists() {
        match ClarityConfig::load(&config_path) {
            Ok(config) => (config, None),
            Err(e) => (ClarityConfig::default(), Some(e)),
        }
    } else {
        (ClarityConfig::default(), None)
    };

    init_tracing(cli.resolve_log_level(), &config.general.log_level);
    tracing::info!("Starting Clarity v{}", env!("CARGO_PKG_VERSION"));
    match config_error {
        Some(e) => tracing::warn!(
            path = %config_path.display(),
            error = %e,
            "Invalid configuration, using defaults"
        ),
        None => tracing::info!(path = %config_path.display(), "Configuration resolved"),
    }

    let data_dir = cli.resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let dbs = Databases::open(&data_dir)?;
    tracing::info!(dir = %data_dir.display(), "SQLite database opened");

    let capture: Arc<dyn CaptureService> = if cli.mock_capture {
        tracing::info!("Using mock capture");
        Arc::new(MockCaptureService::new())
    } else {
        Arc::new(WindowsCaptureService::new())
    };
    let transport = GeminiTransport::new(
        &config.remote.base_url,
        Duration::from_secs(config.remote.request_timeout_secs),
    )?;

    let runtime = PipelineRuntime::build(
        &config,
        &data_dir,
        dbs,
        Capabilities {
            capture,
            transport: Arc::new(transport),
            video: Arc::new(FfmpegEncoder::new()),
        },
    )?;

    if runtime.settings.api_key().is_none() {
        tracing::warn!("No Gemini API key configured; summaries are skipped until one is set");
    }

    if cli.record {
        match runtime.controller.start_recording().await {
            Ok(status) => tracing::info!(path = %status.storage_path, "Recording"),
            Err(e) => tracing::error!(error = %e, "Failed to start recording"),
        }
    }

    let token = load_or_generate_token(&data_dir.join(TOKEN_FILE));
    let port = cli.resolve_port(config.api.port);
    let state = AppState::new(&runtime, token, port);

    let served = clarity_api::serve(&config.api.bind_address, state, shutdown_signal()).await;

    runtime.controller.shutdown().await;
    tracing::info!("Clarity stopped");
    served?;
    Ok(())
}
