//! HTTP delivery of metric batches
//!
//! Batches go out through the [`EgressEncoder`] and are POSTed to
//! `/updates/`. Transient failures (connection errors, 5xx, 429) are retried
//! on a fixed schedule; any other rejection is returned immediately.

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use tally_core::fail_open::retry_with_delays;
use tally_core::{Metric, Result, TallyError};
use tally_ingress::{EgressEncoder, EncodedBatch};
use tracing::debug;

use crate::pool::Delivery;

/// Waits between attempts: 3 retries after the first try
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers batches to a Tally server over HTTP
#[derive(Clone)]
pub struct HttpDelivery {
    client: reqwest::Client,
    url: String,
    encoder: EgressEncoder,
    retry_delays: Vec<Duration>,
}

impl HttpDelivery {
    pub fn new(base_url: &str, encoder: EgressEncoder) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TallyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/updates/", base_url.trim_end_matches('/')),
            encoder,
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One attempt. The outer error is retryable, the inner one is final.
    async fn send_once(&self, encoded: &EncodedBatch) -> Result<Result<()>> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(encoded.body.clone());
        if encoded.compressed {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = request
            .send()
            .await
            .map_err(|e| TallyError::Delivery(format!("Failed to send batch: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Ok(()));
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown".to_string());
        let error = TallyError::Delivery(format!(
            "Server returned {}: {}",
            status,
            error_text.trim()
        ));

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(error)
        } else {
            Ok(Err(error))
        }
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(&self, batch: &[Metric]) -> Result<()> {
        let encoded = self.encoder.encode(batch)?;
        debug!(
            "Sending {} samples ({} bytes) to {}",
            batch.len(),
            encoded.body.len(),
            self.url
        );

        retry_with_delays("batch delivery", || self.send_once(&encoded), &self.retry_delays).await?
    }
}
