//! trailerfin - keeps backdrop trailer links fresh
//!
//! Scans the library once, or keeps running in monitor/schedule mode until
//! interrupted.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trailerfin::cli::CliOptions;
use trailerfin::config::Config;
use trailerfin::jobs::{Scheduler, TrailerRefresher};
use trailerfin::services::{
    IdentifierResolver, ImdbCatalog, LifecycleConfig, LinkLifecycleManager, LinkStore,
    ReferenceWriter, ResolutionCache, SystemClock, TmdbClient, TvdbClient, init_tracing,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = CliOptions::parse();
    let config = Config::from_env(&cli)?;

    init_tracing(config.log_format);

    info!(
        root = %config.scan_path.display(),
        mode = %config.mode,
        workers = config.workers,
        state_dir = %config.state_dir.display(),
        "Starting trailerfin"
    );

    if !config.scan_path.is_dir() {
        bail!("Scan path {} does not exist or is not a directory", config.scan_path.display());
    }

    if config.tmdb_api_key.is_none() {
        warn!("TMDB_API_KEY not set, {{tmdb-…}} folders will be skipped");
    }
    if config.tvdb_api_key.is_none() {
        warn!("TVDB_API_KEY not set, {{tvdb-…}} folders will be skipped");
    }

    let store = Arc::new(LinkStore::open(&config.state_dir)?);

    let tmdb = TmdbClient::new(config.tmdb_api_key.clone().unwrap_or_default())
        .context("Failed to build TMDB client")?;
    let tvdb = TvdbClient::new(config.tvdb_api_key.clone().unwrap_or_default())
        .context("Failed to build TVDB client")?;
    let resolver = Arc::new(
        IdentifierResolver::new(Arc::new(ResolutionCache::new()))
            .with_lookup(Arc::new(tmdb))
            .with_lookup(Arc::new(tvdb)),
    );

    let catalog = ImdbCatalog::new().context("Failed to build IMDb client")?;
    let lifecycle = LifecycleConfig {
        safety_margin: chrono::Duration::from_std(config.link_safety_margin)
            .context("Invalid LINK_SAFETY_MARGIN_SECS")?,
        start_offset: config.video_start_time,
    };
    let manager = Arc::new(LinkLifecycleManager::new(
        store,
        Arc::new(catalog),
        Arc::new(SystemClock),
        lifecycle,
    ));

    let refresher = Arc::new(TrailerRefresher::new(
        resolver,
        manager,
        ReferenceWriter::new(config.video_filename.clone()),
        config.workers,
    ));

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let scheduler = Scheduler::new(refresher, config.scan_path.clone(), config.mode, cancel);
    scheduler.run().await?;

    info!("Shutdown complete");
    Ok(())
}

/// Cancel the token on Ctrl-C or SIGTERM. In-flight writes finish; nothing new starts.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown requested, finishing in-flight work");
    cancel.cancel();
}
