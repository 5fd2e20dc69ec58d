//! Keyed integrity codes for single samples
//!
//! The code is HMAC-SHA256 over a canonical string, hex encoded:
//! `"{id}:gauge:{value}"` for gauges and `"{id}:counter:{delta}"` for
//! counters. Gauges use the shortest representation that parses back to the
//! same `f64`, so any change to the value changes the code.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tally_core::{Metric, MetricValue, Result, TallyError};

type HmacSha256 = Hmac<Sha256>;

/// Canonical string a sample's integrity code is computed over
pub fn canonical_form(metric: &Metric) -> Result<String> {
    Ok(match metric.validate()? {
        MetricValue::Gauge(value) => format!("{}:gauge:{}", metric.id, value),
        MetricValue::Counter(delta) => format!("{}:counter:{}", metric.id, delta),
    })
}

/// Computes and checks integrity codes with a shared secret
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self, metric: &Metric) -> Result<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| TallyError::Integrity(format!("bad signing key: {}", e)))?;
        mac.update(canonical_form(metric)?.as_bytes());
        Ok(mac)
    }

    /// Hex integrity code for `metric`, ignoring any code it already carries
    pub fn code(&self, metric: &Metric) -> Result<String> {
        Ok(hex::encode(self.mac(metric)?.finalize().into_bytes()))
    }

    /// Attach the integrity code to `metric`
    pub fn sign(&self, metric: &mut Metric) -> Result<()> {
        metric.hash = Some(self.code(metric)?);
        Ok(())
    }

    /// True when `metric` carries a code that matches its current content.
    ///
    /// Unsigned samples and malformed codes verify as false. The comparison
    /// is constant time.
    pub fn verify(&self, metric: &Metric) -> Result<bool> {
        let Some(hash) = metric.hash.as_deref() else {
            return Ok(false);
        };
        let Ok(expected) = hex::decode(hash) else {
            return Ok(false);
        };
        Ok(self.mac(metric)?.verify_slice(&expected).is_ok())
    }
}
