//! Remote agent probe service: a small `axum` HTTP listener exposing
//! `POST /execute`, colocated on monitored hosts. Listen address defaults to
//! `:8089`.
//!
//! Structured like the other binaries in this workspace: global allocator,
//! daily rolling JSON logs, `clap` CLI, `broadcast`-channel graceful
//! shutdown.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};

use shared::error::AppError;
use shared::wire::{ExecuteRequest, ExecuteResponse};

mod cpu;

#[derive(Parser, Debug)]
#[command(name = "agent-probe")]
#[command(about = "Remote agent RPC service for host resource probes", long_about = None)]
struct CliArgs {
    /// Address to listen on, e.g. 0.0.0.0:8089
    #[arg(long = "listen-address", value_name = "ADDRESS", default_value = "0.0.0.0:8089")]
    listen_address: String,
}

#[derive(Clone)]
struct AppState;

async fn execute(State(_state): State<AppState>, Json(request): Json<ExecuteRequest>) -> Result<Json<ExecuteResponse>, AppError> {
    let result = match request.command.as_str() {
        "check_cpu" => {
            let usage = cpu::sample_cpu_usage(Duration::from_millis(500)).await?;
            serde_json::to_vec(&CpuPayload { cpus: usage }).map_err(|e| AppError::internal(format!("failed to encode cpu payload: {e}")))?
        }
        "check_ram" | "check_disk" | "check_docker" | "check_resources" => {
            return Err(AppError::not_implemented(format!("command '{}' is not implemented", request.command)));
        }
        other => {
            return Err(AppError::invalid(format!("invalid command '{other}'")));
        }
    };

    Ok(Json(ExecuteResponse::new(result)))
}

#[derive(serde::Serialize)]
struct CpuPayload {
    #[serde(rename = "CPUs")]
    cpus: BTreeMap<String, f64>,
}

fn build_router() -> Router {
    Router::new()
        .route("/execute", post(execute))
        .with_state(AppState)
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
    let file_appender = tracing_appender::rolling::daily("./logs", "agent-probe.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("agent_probe=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(listen_address = %cli_args.listen_address, "agent-probe starting up");

    let addr: SocketAddr = cli_args
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address '{}'", cli_args.listen_address))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    let app = build_router();
    let shutdown_signal = async {
        setup_shutdown_signal().await;
        info!("agent-probe received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    info!("agent-probe shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn execute_rejects_unknown_command() {
        let app = build_router();
        let body = serde_json::to_vec(&ExecuteRequest { command: "check_reboot".into() }).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn execute_returns_not_implemented_for_check_ram() {
        let app = build_router();
        let body = serde_json::to_vec(&ExecuteRequest { command: "check_ram".into() }).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
