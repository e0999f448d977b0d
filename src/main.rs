mod cli;
mod config;
mod error;
mod logging;
mod pipeline;
mod server;
mod service;
mod signer;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::Cli;
use config::ServiceConfig;
use pipeline::{ExitReason, Pipeline, StateFiles, Supervisor};
use service::SigningService;
use signer::HttpSigner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;

    logging::init(&config.log_level);
    info!(listen_addr = %config.listen_addr, "starting signq");

    let signer = HttpSigner::new(&config.signer).context("failed to build signing client")?;
    if config.signer.api_key.is_empty() {
        warn!("no signer API key configured, requests will likely be rejected");
    }

    let files = StateFiles::new(&config.signatures_path, &config.pending_path);
    let state = files.load();

    let mut pipeline = Pipeline::new(&config, Arc::new(signer), state);
    let shutdown = CancellationToken::new();
    let mut supervisor = Supervisor::new(shutdown, pipeline.checkpoint(files));
    pipeline.start(&mut supervisor);
    info!(
        queue_capacity = pipeline.gate().capacity(),
        signing_slots = pipeline.slots().capacity(),
        "pipeline started"
    );
    tokio::spawn(pipeline.replay());

    let service = Arc::new(SigningService::new(&pipeline, config.poll.clone()));
    let server = server::serve(&config.listen_addr, service);

    match supervisor.run(server, shutdown_signal()).await {
        ExitReason::Fatal(e) => Err(e.into()),
        ExitReason::Signal | ExitReason::Finished => Ok(()),
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where available.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to register SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("received SIGINT");
}
