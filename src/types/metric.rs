use serde::{Deserialize, Serialize};

use crate::keys;

/// One discovered metric counter
///
/// Grouping and aggregation by namespace or job class is a presentation
/// concern; this crate only surfaces the flat samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Full counter key, `metrics:{namespace}.{job}.{metricType}:{timestamp}`
    pub key: String,

    /// Counter value; a missing or unparsable value reads as 0
    pub value: i64,

    /// Trailing timestamp segment of the key, verbatim
    pub timestamp: Option<String>,
}

impl MetricSample {
    /// Build a sample from a discovered key and its raw value
    pub fn new(key: String, raw: Option<&str>) -> Self {
        let value = raw.and_then(|raw| raw.trim().parse().ok()).unwrap_or(0);
        let timestamp = keys::metric_timestamp(&key).map(str::to_string);
        Self { key, value, timestamp }
    }
}
