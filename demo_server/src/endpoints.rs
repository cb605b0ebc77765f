//! Endpoints of HTTP server.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    extract::Query,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use common::protocol::{Facing, ResultMsg};
use futures::{future, StreamExt};
use infer_loop::MediaAccessError;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::{CameraStatus, DemoState};

/// Search parameters of the camera controls.
#[derive(Debug, Deserialize)]
pub struct CameraParams {
    #[serde(default)]
    facing: Option<Facing>,
}

type ControlResult = Result<Json<CameraStatus>, (StatusCode, String)>;

/// All routes on top of `state`.
pub fn build_router(state: Arc<DemoState>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/camera/status", get(camera_status))
        .route("/camera/start", post(start_camera))
        .route("/camera/stop", post(stop_camera))
        .route("/camera/switch", post(switch_camera))
        .route("/overlay_stream", get(overlay_stream))
        .route("/results", get(results).delete(clear_results))
        .layer(Extension(state))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn camera_status(Extension(state): Extension<Arc<DemoState>>) -> Json<CameraStatus> {
    Json(state.status())
}

pub async fn start_camera(
    Extension(state): Extension<Arc<DemoState>>,
    Query(params): Query<CameraParams>,
) -> ControlResult {
    let facing = params
        .facing
        .unwrap_or(state.capture.config().default_facing);
    log::info!("Start of {facing} camera requested");

    state.start(facing).await.map(Json).map_err(unavailable)
}

pub async fn stop_camera(Extension(state): Extension<Arc<DemoState>>) -> Json<CameraStatus> {
    log::info!("Stop of camera requested");
    Json(state.stop().await)
}

pub async fn switch_camera(
    Extension(state): Extension<Arc<DemoState>>,
    Query(params): Query<CameraParams>,
) -> ControlResult {
    state.switch(params.facing).await.map(Json).map_err(unavailable)
}

// Overlaid frames as multipart MJPEG.
pub async fn overlay_stream(Extension(state): Extension<Arc<DemoState>>) -> impl IntoResponse {
    log::info!("Overlay stream requested");

    // Lagging receivers skip frames instead of ending the stream
    let stream = BroadcastStream::new(state.frames_tx.subscribe())
        .filter_map(|item| future::ready(item.ok()))
        .map(Ok::<_, Infallible>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// Latest results, newest first.
pub async fn results(Extension(state): Extension<Arc<DemoState>>) -> Json<Vec<ResultMsg>> {
    Json(state.results())
}

pub async fn clear_results(Extension(state): Extension<Arc<DemoState>>) -> StatusCode {
    state.clear_results();
    StatusCode::NO_CONTENT
}

fn unavailable(err: MediaAccessError) -> (StatusCode, String) {
    log::warn!("Camera unavailable: {err}");
    (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
}
