use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tokio_stream::{
    StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{debug, info};

use crate::{
    app_state::AppState,
    core::{errors::AppError, state::CaptureStatus},
    demux::Frame,
};

pub const STREAM_BOUNDARY: &str = "mjpegtap";

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct FrameInfo {
    seq: u64,
    bytes: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    app_name: String,
    capture: CaptureStatus,
    latest_frame: Option<FrameInfo>,
    detector: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(status_response(&state).await)
}

async fn status_response(state: &AppState) -> StatusResponse {
    let capture = state.capture.lock().await.status();
    let latest_frame = state.latest_frame().await.map(|frame| FrameInfo {
        seq: frame.seq(),
        bytes: frame.len(),
    });
    StatusResponse {
        app_name: state.config.app_name.clone(),
        capture,
        latest_frame,
        detector: state
            .detector
            .as_ref()
            .map(|detector| detector.url().to_string()),
    }
}

pub async fn start(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state.start_capture().await.map_err(|err| {
        AppError::new(StatusCode::CONFLICT, format!("capture cannot start: {err:#}"))
    })?;
    info!("capture start requested");
    Ok((StatusCode::ACCEPTED, Json(status_response(&state).await)))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    state.capture.lock().await.stop();

    // Give the pump a moment to observe the cancel and release the source.
    for _ in 0..20 {
        if !state.capture.lock().await.is_active() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    info!("capture stop requested");
    Json(status_response(&state).await)
}

pub async fn snapshot(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let Some(frame) = state.latest_frame().await else {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            "no frame captured yet; wait a moment and retry snapshot",
        ));
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((StatusCode::OK, headers, frame.into_bytes()).into_response())
}

pub async fn stream(State(state): State<Arc<AppState>>) -> Response {
    let parts = BroadcastStream::new(state.subscribe_frames()).filter_map(|item| match item {
        Ok(frame) => Some(Ok::<_, std::io::Error>(multipart_part(&frame))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            debug!(skipped, "stream client fell behind");
            None
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/x-mixed-replace; boundary=mjpegtap"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    (StatusCode::OK, headers, Body::from_stream(parts)).into_response()
}

fn multipart_part(frame: &Frame) -> Bytes {
    let header = format!(
        "--{STREAM_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame.data());
    part.extend_from_slice(b"\r\n");
    part.freeze()
}
