use serde::{Deserialize, Serialize};

/// Aggregate counters maintained by producers and processing agents
///
/// All nine counters are fetched in one batched read; a missing or
/// unparsable counter reads as 0 (0.0 for the latency gauge) because a
/// fresh store has none of these keys yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub processed: u64,
    pub failed: u64,
    pub scheduled: u64,
    pub retries: u64,
    pub dead: u64,
    pub processes: u64,
    pub workers: u64,
    pub enqueued: u64,
    pub default_queue_latency: f64,
}

impl Stats {
    /// Build stats from raw counter values, in [`crate::keys::STATS_KEYS`] order
    pub fn from_values(values: &[Option<String>]) -> Self {
        let int = |idx: usize| -> u64 {
            values
                .get(idx)
                .and_then(|value| value.as_deref())
                .and_then(|value| value.parse().ok())
                .unwrap_or(0)
        };
        let float = |idx: usize| -> f64 {
            values
                .get(idx)
                .and_then(|value| value.as_deref())
                .and_then(|value| value.parse().ok())
                .unwrap_or(0.0)
        };

        Self {
            processed: int(0),
            failed: int(1),
            scheduled: int(2),
            retries: int(3),
            dead: int(4),
            processes: int(5),
            workers: int(6),
            enqueued: int(7),
            default_queue_latency: float(8),
        }
    }
}
