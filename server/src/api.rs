//! Minimal HTTP surface for the composition root: the full REST surface
//! is out of scope here — this is just enough to enroll/withdraw
//! detectors and let real-time clients stream `ResultEvent`s.
//!
//! Follows an `AppState`/`create_router` shape, narrowed to the handful of
//! routes this composition root actually needs.

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{poll_fn, Stream};
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use engine::scheduler::Scheduler;
use shared::error::AppError;
use shared::repo::{DetectorFilter, DetectorRepo, HostFilter, HostRepo};

#[derive(Clone)]
pub struct AppState {
    pub hosts: Arc<dyn HostRepo>,
    pub detectors: Arc<dyn DetectorRepo>,
    pub scheduler: Arc<Scheduler>,
    pub bus: engine::bus::EventBus,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/hosts", get(list_hosts))
        .route("/api/detectors", get(list_detectors))
        .route("/api/detectors/{id}/enroll", post(enroll_detector))
        .route("/api/detectors/{id}/withdraw", post(withdraw_detector))
        .route("/api/detectors/{id}/events", get(stream_detector_events))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_hosts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let hosts = state.hosts.list(HostFilter::default()).await?;
    Ok(Json(hosts))
}

async fn list_detectors(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let detectors = state.detectors.list(DetectorFilter::default()).await?;
    Ok(Json(detectors))
}

async fn enroll_detector(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    state.scheduler.add_detector(id).await?;
    Ok(Json(serde_json::json!({"enrolled": id})))
}

async fn withdraw_detector(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    state.scheduler.remove_detector(id).await;
    Json(serde_json::json!({"withdrawn": id}))
}

async fn stream_detector_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (_sub_id, mut rx) = state.bus.subscribe_channel(id).await?;
    let stream = poll_fn(move |cx| rx.poll_recv(cx)).filter_map(|event| async move {
        serde_json::to_string(&event).ok().map(|json| Ok(Event::default().data(json)))
    });
    Ok(Sse::new(stream))
}
