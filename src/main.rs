use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use linkstash::archiver::{ArchiveWorker, Archiver};
use linkstash::config::Config;
use linkstash::db::{Database, NewLink};
use linkstash::fetch::{HttpFetcher, UrlValidator};
use linkstash::jobs::{self, ArchiveJobRunner};
use linkstash::links::create_link;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting linkstash");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        enabled = config.archive.enabled,
        user_agent = %config.archive.user_agent(),
        workers = config.worker_concurrency,
        "Configuration loaded"
    );
    if !config.archive.enabled {
        warn!("Archival is disabled; new archives will fail with reason 'disabled'");
    }

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let fetcher = HttpFetcher::new(config.archive.clone(), UrlValidator::default())
        .context("Failed to initialize HTTP fetcher")?;
    let archiver = Archiver::new(db.clone(), config.archive.clone(), fetcher);
    let runner = ArchiveJobRunner::new(db.clone(), archiver);
    let worker = ArchiveWorker::new(&config, db.clone(), runner);

    let (queue, receiver) = jobs::channel();

    // Pick up archives whose jobs were lost in a previous run
    if let Err(e) = worker.recover_on_startup(&queue).await {
        error!("Failed to recover archives on startup: {e:#}");
    }

    let worker_handle = tokio::spawn(async move {
        worker.run(receiver).await;
    });
    info!("Archive worker started");

    // Any URLs on the command line are bookmarked right away
    for url in std::env::args().skip(1) {
        let new_link = NewLink {
            url: url.clone(),
            ..NewLink::default()
        };
        match create_link(&db, &queue, &new_link).await {
            Ok(link) => info!(link_id = link.id, url = %link.url, "Bookmarked"),
            Err(e) => error!(url = %url, "Failed to bookmark: {e:#}"),
        }
    }

    shutdown_signal().await;

    info!("Shutting down...");

    worker_handle.abort();

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,linkstash=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
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
                error!("Failed to install SIGTERM handler: {e}");
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
}
