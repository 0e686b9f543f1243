mod artwork;
mod hub;
mod lyrics;
mod options;
mod pool;
mod protocol;
mod reconciler;
mod server;
mod source;
mod state;
mod timer;

use crate::artwork::ColorPublisher;
use crate::hub::Hub;
use crate::lyrics::{LyricCache, ProviderChain};
use crate::options::{Options, OptionsLoader};
use crate::pool::Poller;
use crate::reconciler::Reconciler;
use crate::source::HomeAssistant;
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Application configuration from CLI
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Runtime options file, re-read on every poll
    #[arg(long, default_value = "/data/options.json")]
    options: PathBuf,
    /// Directory holding one `.lrc` file per song
    #[arg(long, default_value = "/data/lyrics")]
    cache_dir: PathBuf,
    /// Home Assistant REST API base URL
    #[arg(long, default_value = "http://supervisor/core/api")]
    api_url: String,
    /// Home Assistant bearer token
    #[arg(long, env = "SUPERVISOR_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Address the HTTP/WebSocket server binds to
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,
    /// Frontend files served at `/`
    #[arg(long, default_value = "/app/frontend")]
    static_dir: PathBuf,
    /// Player state poll interval
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
    /// How long a song change waits for lyrics before broadcasting without them
    #[arg(long, default_value_t = 8)]
    lyrics_timeout_secs: u64,
    /// Wait between polls while no API token is available
    #[arg(long, default_value_t = 30)]
    token_backoff_secs: u64,
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long)]
    pub debug_log: bool,
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn shutdown_signal(loop_tx: mpsc::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown requested");
    let _ = loop_tx.send(()).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cfg = Config::parse();
    init_tracing(cfg.debug_log);

    if cfg.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
        tracing::warn!("No SUPERVISOR_TOKEN set; polling will back off until one is provided");
    }

    let ha = Arc::new(HomeAssistant::new(&cfg.api_url, cfg.token.clone())?);
    // Real provider settings are installed from the options file on the first tick.
    let providers = Arc::new(ProviderChain::new(Options::default().provider_settings()));
    let cache = Arc::new(LyricCache::new(&cfg.cache_dir, providers));
    let hub = Arc::new(Hub::default());

    let poller = Poller::new(
        ha.clone(),
        Reconciler::new(cache, Duration::from_secs(cfg.lyrics_timeout_secs)),
        hub.clone(),
        OptionsLoader::new(&cfg.options),
        Duration::from_millis(cfg.poll_interval_ms.max(1)),
        Duration::from_secs(cfg.token_backoff_secs),
    )
    .with_artwork_hook(Arc::new(ColorPublisher::new(ha)));

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let reconcile = tokio::spawn(pool::listen(poller, shutdown_rx));

    let app = server::router(hub, &cfg.static_dir);
    let listener = tokio::net::TcpListener::bind(&cfg.listen).await?;
    tracing::info!(
        listen = cfg.listen.as_str(),
        api = cfg.api_url.as_str(),
        cache = %cfg.cache_dir.display(),
        "SyncLyrics started"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    reconcile.await?;
    Ok(())
}
