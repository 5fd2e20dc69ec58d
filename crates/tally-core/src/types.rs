//! Core type definitions for Tally metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Result, TallyError};

/// The two metric semantics the store understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Last write wins
    Gauge,
    /// Running sum of increments
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            _ => Err(TallyError::Validation(format!("unknown metric type: {}", s))),
        }
    }
}

/// A resolved, typed metric reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gauge(value) => write!(f, "{}", value),
            Self::Counter(delta) => write!(f, "{}", delta),
        }
    }
}

/// A reading still in its textual form, e.g. taken from a URL path.
///
/// Resolved exactly once at the boundary; the store only ever sees
/// [`MetricValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReading {
    pub kind: MetricKind,
    pub raw: String,
}

impl RawReading {
    pub fn new(kind: MetricKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
        }
    }

    pub fn parse(&self) -> Result<MetricValue> {
        let raw = self.raw.trim();
        match self.kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(MetricValue::Gauge)
                .ok_or_else(|| TallyError::Validation(format!("invalid gauge value: {}", raw))),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| TallyError::Validation(format!("invalid counter delta: {}", raw))),
        }
    }
}

/// A single metric sample as exchanged on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    #[serde(default)]
    pub id: String,

    /// Gauge or counter
    #[serde(rename = "type")]
    pub kind: MetricKind,

    /// Increment, counters only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    /// Absolute value, gauges only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Hex HMAC-SHA256 over the canonical form; absent means unsigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self::from_value(id, MetricValue::Gauge(value))
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self::from_value(id, MetricValue::Counter(delta))
    }

    pub fn from_value(id: impl Into<String>, value: MetricValue) -> Self {
        let (delta, value_field) = match value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        Self {
            id: id.into(),
            kind: value.kind(),
            delta,
            value: value_field,
            hash: None,
        }
    }

    /// A value-less sample, used for lookups
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
            delta: None,
            value: None,
            hash: None,
        }
    }

    /// Checks the id/kind/value invariant and returns the typed reading.
    pub fn validate(&self) -> Result<MetricValue> {
        if self.id.trim().is_empty() {
            return Err(TallyError::Validation("metric id is empty".to_string()));
        }

        match (self.kind, self.value, self.delta) {
            (MetricKind::Gauge, Some(value), None) if value.is_finite() => {
                Ok(MetricValue::Gauge(value))
            }
            (MetricKind::Counter, None, Some(delta)) => Ok(MetricValue::Counter(delta)),
            (kind, value, delta) => Err(TallyError::Validation(format!(
                "metric {} ({}) has value={:?} delta={:?}",
                self.id, kind, value, delta
            ))),
        }
    }
}

/// Point-in-time copy of every stored metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Every stored value as a wire sample, gauges first, each group sorted by name.
    pub fn metrics(&self) -> Vec<Metric> {
        self.gauges
            .iter()
            .map(|(name, value)| Metric::gauge(name.clone(), *value))
            .chain(
                self.counters
                    .iter()
                    .map(|(name, delta)| Metric::counter(name.clone(), *delta)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_json_shape() {
        let json = serde_json::to_value(Metric::gauge("Alloc", 12.5)).unwrap();
        assert_eq!(json, serde_json::json!({"id": "Alloc", "type": "gauge", "value": 12.5}));

        let json = serde_json::to_value(Metric::counter("PollCount", 3)).unwrap();
        assert_eq!(json, serde_json::json!({"id": "PollCount", "type": "counter", "delta": 3}));
    }

    #[test]
    fn test_validate_rejects_wrong_field() {
        let mut metric = Metric::gauge("Temp", 1.0);
        metric.delta = Some(1);
        assert!(matches!(metric.validate(), Err(TallyError::Validation(_))));

        let metric = Metric::query("Requests", MetricKind::Counter);
        assert!(metric.validate().is_err());

        let metric = Metric::counter("", 1);
        assert!(metric.validate().is_err());
    }

    #[test]
    fn test_missing_type_fails_to_decode() {
        let result = serde_json::from_str::<Metric>(r#"{"id": "x", "value": 1.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_raw_reading_parse() {
        let reading = RawReading::new(MetricKind::Gauge, "23.5");
        assert_eq!(reading.parse().unwrap(), MetricValue::Gauge(23.5));

        let reading = RawReading::new(MetricKind::Counter, "4");
        assert_eq!(reading.parse().unwrap(), MetricValue::Counter(4));

        assert!(RawReading::new(MetricKind::Counter, "4.5").parse().is_err());
        assert!(RawReading::new(MetricKind::Gauge, "none").parse().is_err());
        assert!(RawReading::new(MetricKind::Gauge, "NaN").parse().is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("GAUGE".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
        assert!("histogram".parse::<MetricKind>().is_err());
    }
}
