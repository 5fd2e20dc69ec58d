//! HTTP mapping for [`TallyError`]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tally_core::TallyError;
use tracing::{debug, error};

/// Handler error; renders as a plain-text status response
#[derive(Debug)]
pub struct ApiError(pub TallyError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TallyError::NotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TallyError> for ApiError {
    fn from(e: TallyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected ({}): {}", status, self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}
