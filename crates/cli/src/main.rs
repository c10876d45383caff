//! tfc-autoapply entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Load configuration**: read the mounted secrets file, parse flags and
//!    environment variables, and validate them ([`config`]).
//! 2. **Wire observability**: install `tracing-subscriber` with a JSON or
//!    pretty layer and an optional OpenTelemetry OTLP exporter ([`telemetry`]).
//! 3. **Construct infrastructure**: one shared `TfcClient`, the `ApplyQueue`,
//!    the `ApplyWorker` task, and the `CallbackHandler`.
//! 4. **Serve**: bind the listener router and run until Ctrl-C or SIGTERM.
//!    Runs still queued at shutdown are not applied.

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use applier::{ApplyQueue, ApplyWorker};
use autoapply::ProvenanceEvaluator;
use listener::CallbackHandler;
use tfc::TfcClient;

use crate::config::{AppConfig, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let secrets_file = config::secrets_file_path();
    let secrets_loaded = config::load_secrets_file(&secrets_file)?;
    let config = AppConfig::try_from(Args::parse())?;

    let tracer_provider = telemetry::init(config.log_format, config.otlp_endpoint.as_deref())?;
    if secrets_loaded {
        info!(path = %secrets_file.display(), "loaded secrets file");
    }
    info!(?config, "starting tfc-autoapply");

    let result = serve(&config).await;
    telemetry::shutdown(tracer_provider);
    result
}

async fn serve(config: &AppConfig) -> anyhow::Result<()> {
    let client = Arc::new(TfcClient::new(
        config.api_base_url.as_str(),
        config.api_token.clone(),
    )?);
    debug!(api_base_url = client.base_url(), "platform client ready");

    let queue = ApplyQueue::new(config.queue_poll_interval);
    let worker = ApplyWorker::new(client.clone(), queue.clone())
        .with_retry_interval(config.retry_interval)
        .spawn();

    let evaluator = ProvenanceEvaluator::new(client.clone())
        .with_source_allowlist(config.source_allowlist.iter().cloned());
    let handler = CallbackHandler::new(
        config.hmac_secret.clone(),
        evaluator,
        Arc::new(queue.clone()),
        client,
    );
    let app = listener::router(Arc::new(handler), &config.callback_path);

    let tcp = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        callback_path = %config.callback_path,
        "listening for run task callbacks"
    );

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    worker.abort();
    if !queue.is_empty() {
        warn!(pending = queue.len(), "shutting down with runs still queued for auto-apply");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
