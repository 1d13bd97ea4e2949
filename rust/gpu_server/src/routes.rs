//! HTTP routes
//!
//! - `GET /` - service descriptor
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus exposition
//! - `POST /add` - multipart `file_a` + `file_b`, element-wise sum
//! - `GET /gpu-info` - `nvidia-smi` memory inventory (errors are reported in a 200 body)

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use common::{AddResponse, GpuInfoResponse, HealthResponse};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::compute::{AddBackend, AddOutput};
use crate::error::{ProbeError, Result, ServiceError};
use crate::metrics;
use crate::npz::read_first_array;
use crate::state::AppState;

pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/add", post(add_matrices))
        .route("/gpu-info", get(gpu_info))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "GPU Matrix Addition Service",
        "status": "running",
        "device": state.device_label(),
        "endpoints": {
            "health": "/health",
            "metrics": "/metrics",
            "add": "/add (POST, multipart file_a + file_b)",
            "gpu_info": "/gpu-info"
        }
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, metrics::CONTENT_TYPE)],
        state.metrics.render(),
    )
}

async fn add_matrices(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AddResponse>> {
    let start_all = Instant::now();

    let (file_a, file_b) = read_uploads(multipart).await?;
    state.metrics.inc_requests();

    let backend = Arc::clone(&state.backend);
    let max_array_bytes = state.max_array_bytes;
    let (shape, output) = tokio::task::spawn_blocking(move || {
        add_uploads(backend.as_ref(), &file_a, &file_b, max_array_bytes)
    })
    .await
    .map_err(|e| ServiceError::Task(e.to_string()))??;

    state.metrics.observe_latency(output.elapsed);
    debug!(
        "Added {} elements ({:?}) on {} in {:?}",
        output.values.len(),
        shape,
        state.device_label(),
        output.elapsed
    );

    Ok(Json(AddResponse {
        matrix_shape: shape,
        elapsed_time: output.elapsed.as_secs_f64(),
        device: state.device_label().to_string(),
        total_time: start_all.elapsed().as_secs_f64(),
    }))
}

/// Decodes both operands and sums them. Runs on the blocking pool.
fn add_uploads(
    backend: &dyn AddBackend,
    file_a: &[u8],
    file_b: &[u8],
    max_array_bytes: usize,
) -> Result<(Vec<usize>, AddOutput)> {
    let a = read_first_array(file_a, max_array_bytes)?;
    let b = read_first_array(file_b, max_array_bytes)?;

    if a.shape != b.shape {
        debug!("Shape mismatch: {:?} vs {:?}", a.shape, b.shape);
        return Err(ServiceError::bad_input("Matrices must have the same shape"));
    }

    let output = backend.add(&a.data, &b.data)?;
    Ok((a.shape, output))
}

fn multipart_error(context: &str, err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(err.body_text())
    } else {
        ServiceError::bad_input(format!("{}: {}", context, err.body_text()))
    }
}

/// Pulls `file_a` and `file_b` out of the form; other fields are ignored.
async fn read_uploads(mut multipart: Multipart) -> Result<(Bytes, Bytes)> {
    let mut file_a = None;
    let mut file_b = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Bad multipart body", e))?
    {
        let slot = match field.name() {
            Some("file_a") => &mut file_a,
            Some("file_b") => &mut file_b,
            _ => continue,
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error("Failed to read upload", e))?;
        *slot = Some(bytes);
    }

    let file_a = file_a.ok_or(ServiceError::MissingField("file_a"))?;
    let file_b = file_b.ok_or(ServiceError::MissingField("file_b"))?;
    Ok((file_a, file_b))
}

async fn gpu_info(State(state): State<AppState>) -> Json<GpuInfoResponse> {
    let probe = Arc::clone(&state.probe);
    let result = tokio::task::spawn_blocking(move || probe.query())
        .await
        .unwrap_or_else(|e| Err(ProbeError::Join(e.to_string())));

    match result {
        Ok(gpus) => Json(GpuInfoResponse::Gpus { gpus }),
        Err(e) => {
            warn!("GPU probe failed: {}", e);
            Json(GpuInfoResponse::Error {
                error: e.to_string(),
            })
        }
    }
}
