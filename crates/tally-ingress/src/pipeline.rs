//! Inbound payload conditioning
//!
//! Every body-carrying request passes through a fixed chain before it is
//! allowed near storage:
//!
//! ```text
//! body ──► Decompress ──► Decrypt ──► Verify ──► plaintext JSON
//!          (if gzip)      (if key)    (if secret)
//! ```
//!
//! Each stage passes the request through untouched when its capability is
//! not configured, so a server with no key material accepts plain JSON.
//! Liveness checks skip the chain entirely.

use bytes::Bytes;
use serde::Deserialize;
use tally_core::{Metric, Result, TallyError};
use tracing::debug;

use crate::codec;
use crate::envelope::Decryptor;
use crate::signer::Signer;

/// What the inbound request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Liveness check; never conditioned
    Ping,
    /// Single sample update
    Update,
    /// Batch update
    UpdateBatch,
    /// Value lookup
    Query,
}

/// An inbound payload as it moves through the chain
#[derive(Debug, Clone)]
pub struct IngressRequest {
    pub operation: Operation,
    /// The sender declared a gzip body
    pub compressed: bool,
    pub body: Bytes,
}

impl IngressRequest {
    pub fn new(operation: Operation, compressed: bool, body: impl Into<Bytes>) -> Self {
        Self {
            operation,
            compressed,
            body: body.into(),
        }
    }
}

/// One link of the chain
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, request: IngressRequest) -> Result<IngressRequest>;
}

/// Gunzips bodies the sender marked as compressed
pub struct DecompressStage;

impl Stage for DecompressStage {
    fn name(&self) -> &'static str {
        "decompress"
    }

    fn apply(&self, request: IngressRequest) -> Result<IngressRequest> {
        if !request.compressed {
            return Ok(request);
        }
        let body = codec::decompress(&request.body)?;
        Ok(IngressRequest {
            compressed: false,
            body: body.into(),
            ..request
        })
    }
}

/// Opens RSA-sealed bodies when a private key is configured
pub struct DecryptStage {
    decryptor: Option<Decryptor>,
}

impl Stage for DecryptStage {
    fn name(&self) -> &'static str {
        "decrypt"
    }

    fn apply(&self, request: IngressRequest) -> Result<IngressRequest> {
        let Some(decryptor) = &self.decryptor else {
            return Ok(request);
        };
        let body = decryptor.decrypt(&request.body)?;
        Ok(IngressRequest {
            body: body.into(),
            ..request
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Batch(Vec<Metric>),
    Single(Metric),
}

/// Checks every sample's integrity code when a secret is configured.
///
/// One bad sample rejects the whole payload. Lookups carry no values and
/// are not checked.
pub struct VerifyStage {
    signer: Option<Signer>,
    require_signatures: bool,
}

impl VerifyStage {
    fn verify_all(&self, signer: &Signer, samples: &[Metric]) -> Result<()> {
        for (index, sample) in samples.iter().enumerate() {
            if sample.id.trim().is_empty() {
                return Err(TallyError::Integrity(format!("sample {} has no id", index)));
            }

            if sample.hash.is_none() {
                if self.require_signatures {
                    return Err(TallyError::Integrity(format!(
                        "sample {} ({}) is unsigned",
                        index, sample.id
                    )));
                }
                continue;
            }

            let valid = signer.verify(sample).map_err(|e| {
                TallyError::Integrity(format!("sample {} ({}): {}", index, sample.id, e))
            })?;
            if !valid {
                return Err(TallyError::Integrity(format!(
                    "sample {} ({}) failed verification",
                    index, sample.id
                )));
            }
        }
        Ok(())
    }
}

impl Stage for VerifyStage {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn apply(&self, request: IngressRequest) -> Result<IngressRequest> {
        let Some(signer) = &self.signer else {
            return Ok(request);
        };
        if request.operation == Operation::Query {
            return Ok(request);
        }

        let payload: Payload = serde_json::from_slice(&request.body)
            .map_err(|e| TallyError::Integrity(format!("undecodable payload: {}", e)))?;

        match payload {
            Payload::Batch(samples) => self.verify_all(signer, &samples)?,
            Payload::Single(sample) => self.verify_all(signer, std::slice::from_ref(&sample))?,
        }
        Ok(request)
    }
}

/// The fixed decompress → decrypt → verify chain
pub struct IngressPipeline {
    stages: Vec<Box<dyn Stage>>,
    require_signatures: bool,
}

impl IngressPipeline {
    pub fn new(decryptor: Option<Decryptor>, signer: Option<Signer>, require_signatures: bool) -> Self {
        Self {
            stages: vec![
                Box::new(DecompressStage),
                Box::new(DecryptStage { decryptor }),
                Box::new(VerifyStage {
                    signer,
                    require_signatures,
                }),
            ],
            require_signatures,
        }
    }

    /// True when every written sample must carry a valid integrity code
    pub fn requires_signatures(&self) -> bool {
        self.require_signatures
    }

    /// Plain mode: only gzip is unwound
    pub fn plain() -> Self {
        Self::new(None, None, false)
    }

    /// Run the chain, returning the plaintext request
    pub fn process(&self, request: IngressRequest) -> Result<IngressRequest> {
        if request.operation == Operation::Ping {
            return Ok(request);
        }

        self.stages.iter().try_fold(request, |request, stage| {
            let len = request.body.len();
            let request = stage.apply(request)?;
            debug!("{} stage: {} -> {} bytes", stage.name(), len, request.body.len());
            Ok(request)
        })
    }
}

impl Default for IngressPipeline {
    fn default() -> Self {
        Self::plain()
    }
}
