//! Tally Ingress - payload conditioning between agents and the store
//!
//! The agent side encodes batches with [`EgressEncoder`]; the server side
//! runs every body through [`IngressPipeline`] before it reaches storage.

pub mod codec;
mod egress;
mod envelope;
mod pipeline;
mod signer;

pub use egress::{EgressEncoder, EncodedBatch};
pub use envelope::{generate_key_pair, Decryptor, Encryptor};
pub use pipeline::{
    DecompressStage, DecryptStage, IngressPipeline, IngressRequest, Operation, Stage, VerifyStage,
};
pub use signer::{canonical_form, Signer};
