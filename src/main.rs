use anyhow::{Context, Result};
use clap::Parser;
use instant_replay::{
    create_router, AppState, CaptureController, CaptureSource, CaptureSourceFactory, Config,
    DirectorySink, Exporter, SegmentStore,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "instant-replay")]
#[command(about = "Rolling capture buffer that saves the last few seconds on demand")]
struct Args {
    /// Config file path, without extension
    #[arg(short, long, default_value = "config/instant-replay")]
    config: String,

    /// Override the HTTP port from the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Start capturing as soon as the server is up
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    info!("Instant Replay v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!(
        "Buffer capacity: {}s (allowed {}..={}s)",
        cfg.replay.capacity_secs, cfg.replay.min_capacity_secs, cfg.replay.max_capacity_secs
    );

    let store = SegmentStore::new(cfg.replay.capacity_secs, cfg.replay.capacity_range())?
        .into_shared();
    let source = CaptureSourceFactory::create(&cfg.capture, &cfg.replay)?;
    info!("Capture source: {}", source.name());

    let exporter = Exporter::new(cfg.replay.filename_prefix.clone(), source.container().clone());
    let sink = Arc::new(DirectorySink::new(&cfg.output.dir));
    info!("Saved replays go to: {}", cfg.output.dir);

    let controller = CaptureController::new(source, store, cfg.replay.controller_config());
    let state = AppState::new(controller, exporter, sink);

    if args.autostart {
        if let Err(e) = state.controller.lock().await.start().await {
            error!("Autostart failed: {}", e);
        }
    }

    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", cfg.service.http.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP API listening on http://{}", addr);

    axum::serve(listener, create_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = state.controller.lock().await.shutdown().await {
        error!("Capture did not stop cleanly: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down..."),
        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
    }
}
