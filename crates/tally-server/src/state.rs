//! Shared handler state and startup wiring

use std::sync::Arc;
use tally_core::{Result, ServerConfig, TallyError};
use tally_ingress::{Decryptor, IngressPipeline, Signer};
use tally_metrics::{open_backend, MetricStore, Persister};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub persister: Persister,
    pub pipeline: Arc<IngressPipeline>,
}

impl AppState {
    pub fn new(persister: Persister, pipeline: IngressPipeline) -> Self {
        Self {
            persister,
            pipeline: Arc::new(pipeline),
        }
    }
}

/// Build the ingress chain from the configured key material
pub fn build_pipeline(config: &ServerConfig) -> Result<IngressPipeline> {
    let decryptor = config
        .crypto_key
        .as_ref()
        .map(|path| {
            info!("Decrypting inbound payloads with {}", path.display());
            Decryptor::load(path)
        })
        .transpose()?;

    let signer = config.key.as_deref().filter(|k| !k.is_empty()).map(|key| {
        info!("Verifying sample integrity codes");
        Signer::new(key)
    });

    if config.require_signatures && signer.is_none() {
        return Err(TallyError::Config(
            "require_signatures is set but no key is configured".to_string(),
        ));
    }

    Ok(IngressPipeline::new(decryptor, signer, config.require_signatures))
}

/// Open storage and restore the last snapshot.
///
/// On restore failure the backend is closed before the error is returned.
pub async fn open_persister(config: &ServerConfig) -> Result<Persister> {
    let backend = open_backend(&config.storage_target(), config.is_synchronous()).await?;
    let persister = Persister::new(MetricStore::new(), backend);

    if let Err(e) = persister.restore_on_startup(config.restore).await {
        if let Some(backend) = persister.backend() {
            if let Err(close_err) = backend.close().await {
                warn!("Failed to close {} backend: {}", backend.name(), close_err);
            }
        }
        return Err(e);
    }
    Ok(persister)
}
