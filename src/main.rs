//! Composition root (SPEC_FULL.md §0): wires a SQLite-backed
//! `Persistence`, an in-process `Broker`, the `AutomodEngine`, the
//! `NotificationService`, a no-op `MediaPort`, and the `WorkerManager`,
//! then runs until SIGINT/SIGTERM. HTTP routing, the web client, and
//! federation are external collaborators this binary does not start.

use amityvox_core::automod::AutomodEngine;
use amityvox_core::broker::InMemoryBroker;
use amityvox_core::config::Config;
use amityvox_core::media::NoopMediaPort;
use amityvox_core::notifications::{AllowAllPreferences, LoggingDeliveryPort, NotificationService};
use amityvox_core::persistence::SqlitePersistence;
use amityvox_core::spam::SpamTracker;
use amityvox_core::worker_manager::{WorkerManager, WorkerManagerConfig};
use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "amityvox-core", version)]
#[command(about = "Event bus, automod, and notification-derivation background subsystem")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = if debug { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = Config::load().context("failed to load configuration")?;
    let persistence = Arc::new(SqlitePersistence::connect(&config.database_url).await.context("failed to connect to database")?);
    let broker = Arc::new(InMemoryBroker::new());
    let media = Arc::new(NoopMediaPort::new());
    let spam_tracker = Arc::new(SpamTracker::new());

    let automod = Arc::new(AutomodEngine::new(
        persistence.clone(),
        broker.clone(),
        spam_tracker.clone(),
        config.default_timeout_secs,
    ));

    let notifications = Arc::new(NotificationService::new(
        persistence.clone(),
        Arc::new(AllowAllPreferences),
        Arc::new(LoggingDeliveryPort),
        true,
    ));

    let manager = WorkerManager::new(WorkerManagerConfig {
        config,
        persistence,
        broker,
        media,
        search: None,
        automod: Some(automod),
        notifications: Some(notifications),
        spam_tracker,
    });

    manager.start();
    tracing::info!("amityvox-core running, waiting for shutdown signal");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl_c")?;
    tracing::info!("shutdown signal received");

    manager.stop().await;
    Ok(())
}
