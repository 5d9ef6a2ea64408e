use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;

/// Snapshot of one queue: its name, pending length and latency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Queue name (the `{name}` of `queue:{name}`)
    pub name: String,

    /// Number of pending job records
    pub size: u64,

    /// Seconds since the oldest pending job was enqueued; 0 when empty or
    /// when the tail record is unreadable
    pub latency_secs: f64,
}

impl QueueInfo {
    /// Latency derived from the tail (oldest) record of a queue list
    ///
    /// The enqueue time is preferred, falling back to the creation time.
    /// Absent or undecodable tails read as zero latency rather than failing
    /// the enumeration.
    pub fn latency_from_tail(tail: Option<&str>, now: DateTime<Utc>) -> f64 {
        let Some(raw) = tail else { return 0.0 };
        let Ok(job) = Job::decode(raw) else { return 0.0 };
        match job.enqueued_at.or(job.created_at) {
            Some(at) => ((now - at).num_milliseconds() as f64 / 1000.0).max(0.0),
            None => 0.0,
        }
    }
}
