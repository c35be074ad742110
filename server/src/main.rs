//! Composition root: wires the persistence interfaces, event bus,
//! notifier, result pipeline, scheduler, and session sweeper together behind
//! a minimal HTTP surface.
//!
//! A global jemalloc allocator, daily-rolling JSON logs, a `clap` CLI, and
//! `tokio::select!` between serving and the signal handler, with every
//! background task torn down before exit.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shared::config::ConfigManager;
use shared::crypter::AesGcmCrypter;
use shared::metrics::InMemoryTimeSeriesStore;
use shared::preferences::InMemoryPreferenceRepo;
use shared::repo::{InMemoryDetectorRepo, InMemoryHostRepo, InMemoryRecipientRepo};
use shared::session::InMemorySessionRepo;

use engine::bus::EventBus;
use engine::notifier::{ChatBotSender, MailSender, Notifier};
use engine::pipeline::Pipeline;
use engine::scheduler::Scheduler;
use engine::session_cache::SessionSweeper;

mod api;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Host and service observability platform", long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(long = "config", value_name = "PATH", default_value = "config.toml")]
    config_path: String,
}

async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());
        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to receive Ctrl+C signal: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("server=info,engine=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(config_path = %cli_args.config_path, "server starting up");

    let mut config_manager = ConfigManager::new(&cli_args.config_path);
    let config = config_manager
        .load()
        .with_context(|| format!("failed to load config from '{}'", cli_args.config_path))?
        .clone();

    let secret = config.secret_bytes().context("invalid config secret")?;
    let crypter: Arc<dyn shared::crypter::Crypter> = Arc::new(AesGcmCrypter::new(&secret));

    let host_repo = Arc::new(InMemoryHostRepo::default());
    let detector_repo = Arc::new(InMemoryDetectorRepo::default());
    let recipient_repo = Arc::new(InMemoryRecipientRepo::default());
    let preference_repo = Arc::new(InMemoryPreferenceRepo::default());
    let session_repo = Arc::new(InMemorySessionRepo::default());
    let ts_store = Arc::new(InMemoryTimeSeriesStore::default());

    let bus = EventBus::new();

    let notifier = Arc::new(Notifier::new());
    let mail_sender = Arc::new(MailSender::new(preference_repo.clone(), recipient_repo.clone(), crypter.clone()));
    notifier.register("mail", mail_sender).await.context("failed to register mail sender")?;
    let chat_client = reqwest::Client::new();
    let chat_sender = Arc::new(ChatBotSender::new(preference_repo.clone(), crypter.clone(), chat_client));
    notifier.register("chatbot", chat_sender).await.context("failed to register chatbot sender")?;

    let pipeline = Arc::new(Pipeline::new(detector_repo.clone(), ts_store.clone(), bus.clone(), notifier.clone()));

    let http_client = reqwest::Client::new();
    let scheduler = Arc::new(Scheduler::new(
        detector_repo.clone(),
        host_repo.clone(),
        bus.clone(),
        pipeline.clone(),
        http_client,
        config.engine.worker_pool_size,
        Duration::from_secs(config.engine.scheduler_tick_seconds),
    ));
    scheduler.start().await.context("failed to start scheduler")?;

    let session_sweeper = Arc::new(SessionSweeper::new(
        session_repo.clone(),
        Duration::from_secs(config.engine.session_sweep_interval_seconds),
    ));
    session_sweeper.start().await.context("failed to start session sweeper")?;

    let app_state = api::AppState {
        hosts: host_repo.clone(),
        detectors: detector_repo.clone(),
        scheduler: scheduler.clone(),
        bus: bus.clone(),
    };
    let app = api::create_router(app_state);

    let addr = config.http_listen_addr().context("invalid http listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "listening");

    let shutdown_signal = async {
        setup_shutdown_signal().await;
        info!("server received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    if let Err(e) = scheduler.stop().await {
        warn!(error = %e, "scheduler did not stop cleanly");
    }
    if let Err(e) = session_sweeper.stop().await {
        warn!(error = %e, "session sweeper did not stop cleanly");
    }
    bus.stop().await;

    info!("server shutdown complete");
    Ok(())
}
