mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

use roomwatch_core::{
    live::{LiveOptions, SourceRegistry},
    logging, Config, EventBus, InfoCache, Live, RoomTable,
};
use roomwatch_livestream::{
    locate_ffmpeg, util::sleep_or_stop, PusherManager, RecorderManager, WatcherManager,
};

use cli::Cli;

/// Pause between starting two watchers so platforms are not hit at once
const ROOM_START_SPACING: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse command line
    let cli = Cli::parse();

    // 2. Load configuration, then layer the command line over it
    let mut config = match cli.config_path() {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => Config::from_env().context("Failed to load config")?,
    };
    cli.apply(&mut config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.log, config.debug)?;
    info!(version = env!("CARGO_PKG_VERSION"), "RoomWatch starting");
    debug!(config = ?config, "Effective configuration");

    // 4. ffmpeg is needed for every non-native capture and for pushing
    let ffmpeg = locate_ffmpeg(config.ffmpeg_path.as_deref())
        .context("ffmpeg not found, set ffmpeg_path or add it to PATH")?;
    info!(path = %ffmpeg.display(), "Using ffmpeg");

    // 5. Shared services and managers
    let config = Arc::new(config);
    let bus = Arc::new(EventBus::new());
    let cache = InfoCache::new();
    let rooms = Arc::new(RoomTable::new());

    let watchers = Arc::new(WatcherManager::new(
        Arc::clone(&config),
        Arc::clone(&bus),
        Arc::clone(&rooms),
    ));
    watchers.register();
    let recorders = Arc::new(RecorderManager::new(
        Arc::clone(&config),
        Arc::clone(&bus),
        cache.clone(),
        Arc::clone(&watchers),
        ffmpeg.clone(),
    ));
    recorders.register();
    let pushers = Arc::new(PusherManager::new(
        Arc::clone(&config),
        Arc::clone(&bus),
        Arc::clone(&watchers),
        ffmpeg,
    ));
    pushers.register();
    info!("Managers initialized");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // 6. Build a source for every configured room
    let registry = SourceRegistry::new();
    let mut listened: Vec<Arc<dyn Live>> = Vec::new();
    for room in &config.live_rooms {
        let url = match Url::parse(room.url.trim()) {
            Ok(url) => url,
            Err(e) => {
                error!(url = %room.url, error = %e, "Invalid room url, skipped");
                continue;
            }
        };
        let options = live_options(&config, &url, room.quality);

        let created = tokio::select! {
            () = shutdown.cancelled() => break,
            created = registry.create(url, &cache, options) => created,
        };
        let live = match created {
            Ok(live) => live,
            Err(e) => {
                error!(url = %room.url, error = %e, "Failed to create room source, skipped");
                continue;
            }
        };

        if !rooms.insert(Arc::clone(&live)) {
            error!(url = %room.url, room_id = %live.live_id(), "Duplicate room, skipped");
            continue;
        }
        if room.listen {
            listened.push(live);
        }
    }
    info!(rooms = rooms.len(), listening = listened.len(), "Room sources ready");

    // 7. Start watchers one by one
    for (index, live) in listened.into_iter().enumerate() {
        if index > 0 && sleep_or_stop(ROOM_START_SPACING, &shutdown).await {
            break;
        }
        if let Err(e) = watchers.add(Arc::clone(&live)).await {
            error!(url = %live.raw_url(), error = %e, "Failed to start watcher");
        }
    }

    // 8. Run until asked to stop
    shutdown.cancelled().await;
    info!("Shutting down...");
    watchers.close();
    recorders.close().await;
    pushers.close().await;
    info!("RoomWatch stopped");

    Ok(())
}

/// Cookies configured for the room's host plus its quality preference
fn live_options(config: &Config, url: &Url, quality: i32) -> LiveOptions {
    let options = LiveOptions::default().with_quality(quality);
    match url.host_str().and_then(|host| config.cookies.get(host)) {
        Some(cookies) => options.with_kv_cookies(cookies),
        None => options,
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
