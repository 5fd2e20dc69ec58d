//! Route handlers
//!
//! Body-carrying handlers see plaintext JSON; the ingress middleware has
//! already unwound compression, encryption and integrity codes.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use std::fmt::Write;
use tally_core::{Metric, MetricKind, RawReading, TallyError};

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn decode<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(TallyError::Validation(format!("malformed JSON body: {}", e))))
}

/// POST /update/:kind/:name/:value
///
/// Path updates cannot carry an integrity code, so they are refused when
/// signatures are required.
pub async fn update_from_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<String> {
    if state.pipeline.requires_signatures() {
        return Err(TallyError::Integrity(format!(
            "unsigned path update for {} refused; signatures are required",
            name
        ))
        .into());
    }
    let kind: MetricKind = kind.parse()?;
    let stored = state
        .persister
        .apply_raw(&name, &RawReading::new(kind, value))
        .await?;
    Ok(stored.to_string())
}

/// POST /update/
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let metric: Metric = decode(&body)?;
    Ok(Json(state.persister.apply_metric(&metric).await?))
}

/// POST /updates/
pub async fn update_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Vec<Metric>>> {
    let batch: Vec<Metric> = decode(&body)?;
    Ok(Json(state.persister.apply_batch(&batch).await?))
}

/// GET /value/:kind/:name
pub async fn value_from_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind: MetricKind = kind.parse()?;
    Ok(state.persister.get(kind, &name).await?.to_string())
}

/// POST /value/
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let query: Metric = decode(&body)?;
    if query.id.trim().is_empty() {
        return Err(TallyError::Validation("metric id is empty".to_string()).into());
    }
    let value = state.persister.get(query.kind, &query.id).await?;
    Ok(Json(Metric::from_value(query.id, value)))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// GET /
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let snapshot = state.persister.snapshot().await;

    let mut rows = String::new();
    for metric in snapshot.metrics() {
        let value = match (metric.value, metric.delta) {
            (Some(v), _) => v.to_string(),
            (_, Some(d)) => d.to_string(),
            _ => String::new(),
        };
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&metric.id),
            metric.kind,
            value
        );
    }

    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>Metrics</title></head><body>\
         <h1>Metrics ({})</h1>\
         <table><tr><th>Name</th><th>Type</th><th>Value</th></tr>{}</table>\
         </body></html>",
        snapshot.len(),
        rows
    ))
}

/// GET /ping
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.persister.ping().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            tracing::warn!("Storage health check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
