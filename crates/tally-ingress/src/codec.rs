//! Gzip payload codec

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tally_core::{Result, TallyError};

/// Upper bound on a decompressed payload, guards against gzip bombs
pub const MAX_DECOMPRESSED_LEN: u64 = 32 * 1024 * 1024;

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data)
        .take(MAX_DECOMPRESSED_LEN + 1)
        .read_to_end(&mut decoded)
        .map_err(|e| TallyError::Transport(format!("malformed gzip payload: {}", e)))?;

    if decoded.len() as u64 > MAX_DECOMPRESSED_LEN {
        return Err(TallyError::Transport(format!(
            "decompressed payload exceeds {} bytes",
            MAX_DECOMPRESSED_LEN
        )));
    }
    Ok(decoded)
}
