//! Runs request bodies through the ingress pipeline before any handler
//! decodes them

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::middleware::Next;
use axum::response::Response;
use tally_core::TallyError;
use tally_ingress::{IngressRequest, Operation};

use crate::error::ApiError;
use crate::state::AppState;

/// Largest body accepted off the wire, before decompression
pub const MAX_BODY_LEN: usize = 8 * 1024 * 1024;

fn operation_for(path: &str) -> Operation {
    if path.starts_with("/updates") {
        Operation::UpdateBatch
    } else if path.starts_with("/value") {
        Operation::Query
    } else if path.starts_with("/ping") {
        Operation::Ping
    } else {
        Operation::Update
    }
}

fn is_gzip(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}

pub async fn condition_body(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let operation = operation_for(request.uri().path());
    let compressed = is_gzip(&request);

    let (mut parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_LEN)
        .await
        .map_err(|e| TallyError::Transport(format!("unreadable body: {}", e)))?;

    let pipeline = state.pipeline.clone();
    let plain = tokio::task::spawn_blocking(move || {
        pipeline.process(IngressRequest::new(operation, compressed, body))
    })
    .await
    .map_err(|e| TallyError::Other(format!("ingress task failed: {}", e)))??;

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(plain.body))).await)
}
