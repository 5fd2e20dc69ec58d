//! Asymmetric payload encryption (RSA-OAEP with SHA-256)
//!
//! RSA can only seal `k - 2*32 - 2` bytes at a time (`k` is the modulus size
//! in bytes), so payloads are split into chunks of that size and each chunk
//! becomes exactly `k` bytes of ciphertext. The decryptor splits on `k`.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;
use tally_core::{Result, TallyError};

const OAEP_OVERHEAD: usize = 2 * 32 + 2;

fn key_error(e: impl std::fmt::Display) -> TallyError {
    TallyError::Config(format!("invalid RSA key: {}", e))
}

/// Server-side: opens payloads sealed with the matching public key
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parse a PKCS#8 or PKCS#1 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map(Self::new)
            .map_err(key_error)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&std::fs::read_to_string(path)?)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(TallyError::Transport(format!(
                "ciphertext length {} is not a multiple of {}",
                ciphertext.len(),
                block
            )));
        }

        let mut plaintext = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(block) {
            let opened = self
                .key
                .decrypt(Oaep::new::<Sha256>(), chunk)
                .map_err(|e| TallyError::Transport(format!("decryption failed: {}", e)))?;
            plaintext.extend_from_slice(&opened);
        }
        Ok(plaintext)
    }

    /// The matching public half
    pub fn encryptor(&self) -> Encryptor {
        Encryptor::new(self.key.to_public_key())
    }

    /// PKCS#8 PEM encoding of the private key
    pub fn to_pem(&self) -> Result<String> {
        self.key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(key_error)
    }
}

/// Agent-side: seals payloads for the holder of the private key
#[derive(Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Parse an SPKI or PKCS#1 PEM public key
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map(Self::new)
            .map_err(key_error)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_pem(&std::fs::read_to_string(path)?)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        let chunk_len = block
            .checked_sub(OAEP_OVERHEAD)
            .filter(|len| *len > 0)
            .ok_or_else(|| TallyError::Config("RSA key too small for OAEP".to_string()))?;

        let mut rng = rand::thread_rng();
        let mut sealed = Vec::with_capacity((plaintext.len() / chunk_len + 1) * block);

        let seal = |chunk: &[u8], rng: &mut rand::rngs::ThreadRng| {
            self.key
                .encrypt(rng, Oaep::new::<Sha256>(), chunk)
                .map_err(|e| TallyError::Transport(format!("encryption failed: {}", e)))
        };

        if plaintext.is_empty() {
            sealed.extend(seal(&[], &mut rng)?);
        }
        for chunk in plaintext.chunks(chunk_len) {
            sealed.extend(seal(chunk, &mut rng)?);
        }
        Ok(sealed)
    }

    /// SPKI PEM encoding of the public key
    pub fn to_pem(&self) -> Result<String> {
        self.key
            .to_public_key_pem(LineEnding::LF)
            .map_err(key_error)
    }
}

/// Generate a fresh key pair of `bits` modulus size
pub fn generate_key_pair(bits: usize) -> Result<(Encryptor, Decryptor)> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits).map_err(key_error)?;
    let decryptor = Decryptor::new(key);
    Ok((decryptor.encryptor(), decryptor))
}
