//! Outbound payload preparation, the mirror image of the ingress chain
//!
//! The agent signs each sample, serializes the batch, seals it for the
//! server and gzips the result. The server unwinds these steps in reverse.

use tally_core::{Metric, Result};

use crate::codec;
use crate::envelope::Encryptor;
use crate::signer::Signer;

/// A batch ready to go on the wire
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub body: Vec<u8>,
    pub compressed: bool,
}

/// Signs, seals and compresses outbound batches
#[derive(Clone, Default)]
pub struct EgressEncoder {
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
    compress: bool,
}

impl EgressEncoder {
    pub fn new(signer: Option<Signer>, encryptor: Option<Encryptor>) -> Self {
        Self {
            signer,
            encryptor,
            compress: true,
        }
    }

    /// Toggle gzip on the outbound body
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    pub fn encode(&self, samples: &[Metric]) -> Result<EncodedBatch> {
        let mut samples = samples.to_vec();
        if let Some(signer) = &self.signer {
            for sample in &mut samples {
                signer.sign(sample)?;
            }
        }

        let json = serde_json::to_vec(&samples)?;

        let sealed = match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&json)?,
            None => json,
        };

        let body = if self.compress {
            codec::compress(&sealed)?
        } else {
            sealed
        };

        Ok(EncodedBatch {
            body,
            compressed: self.compress,
        })
    }
}
