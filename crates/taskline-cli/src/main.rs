use std::path::Path;

use anyhow::Context;
use clap::Parser;
use taskline_core::app::WorkerLoop;
use taskline_core::config::{Config, QueueBackend};
use taskline_core::http::{AppState, router};
use tokio::io::AsyncReadExt;

mod bootstrap;
mod cli;

use bootstrap::{Components, QueueEvent};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("taskline error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("failed to load .env"),
    }
    let config = Config::from_env().context("invalid configuration")?;
    let components = Components::open(&config).await?;

    match cli.command {
        cli::Commands::Serve { with_worker } => serve(&config, &components, with_worker).await,
        cli::Commands::Worker => worker(&config, &components).await,
        cli::Commands::HandleBatch { event } => {
            handle_batch(&config, &components, event.as_deref()).await
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("TASKLINE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

async fn serve(config: &Config, components: &Components, with_worker: bool) -> anyhow::Result<()> {
    if config.queue_backend == QueueBackend::Memory && !with_worker {
        tracing::warn!("memory queue without --with-worker: tasks will never be processed");
    }

    let worker = with_worker.then(|| {
        WorkerLoop::spawn(
            components.queue.clone(),
            components.worker_handler(config),
            config.poll_settings(),
        )
    });

    let app = router(AppState {
        service: components.service(),
        environment: config.environment.clone(),
    });
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, environment = %config.environment, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    if let Some(worker) = worker {
        worker.shutdown_and_join().await;
    }
    served
}

async fn worker(config: &Config, components: &Components) -> anyhow::Result<()> {
    let worker = WorkerLoop::spawn(
        components.queue.clone(),
        components.worker_handler(config),
        config.poll_settings(),
    );
    shutdown_signal().await;
    worker.shutdown_and_join().await;
    Ok(())
}

/// One-shot entry point for an external queue trigger.
///
/// The trigger owns the receipts and deletes what succeeded; the printed
/// `failed` list is what it should leave for redelivery.
async fn handle_batch(
    config: &Config,
    components: &Components,
    event: Option<&Path>,
) -> anyhow::Result<()> {
    let raw = match event {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read event from stdin")?;
            raw
        }
    };
    let event = QueueEvent::parse(&raw)?;

    let summary = components
        .worker_handler(config)
        .handle_batch(&event.records)
        .await;

    println!("{}", serde_json::to_string_pretty(&summary.to_response())?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
