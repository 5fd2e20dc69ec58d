//! Router assembly and the listen loop

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tally_core::{Result, TallyError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::condition_body;
use crate::state::AppState;

/// Every route, with the ingress chain on the JSON body routes only
pub fn router(state: AppState) -> Router {
    let conditioned = Router::new()
        .route("/update/", post(handlers::update_json))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/", post(handlers::value_json))
        .route_layer(middleware::from_fn_with_state(state.clone(), condition_body));

    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/update/:kind/:name/:value", post(handlers::update_from_path))
        .route("/value/:kind/:name", get(handlers::value_from_path))
        .merge(conditioned)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| TallyError::Other(format!("server error: {}", e)))?;

    info!("Server stopped");
    Ok(())
}

/// Bind `address`, accepting `host:port` with an optional scheme
pub async fn bind(address: &str) -> Result<TcpListener> {
    let address = address
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    Ok(TcpListener::bind(address).await?)
}
