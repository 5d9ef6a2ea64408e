//! Redis key layout consumed and produced by this crate.
//!
//! The layout follows the Sidekiq convention so that queue-lens can inspect
//! state written by stock producers and workers. Everything here is
//! declarative: candidate roster keys and counter keys are ordered tables,
//! not branching logic.

/// Set of all known queue names.
pub const QUEUES: &str = "queues";

/// Prefix for per-queue job lists. A queue named "default" stores its
/// serialized job records under "queue:default", head = newest.
pub const QUEUE_PREFIX: &str = "queue:";

/// Sorted set of jobs scheduled for a future run; score = epoch seconds.
pub const SCHEDULE_SET: &str = "schedule";

/// Sorted set of jobs awaiting retry; score = next retry time in epoch seconds.
pub const RETRY_SET: &str = "retry";

/// Sorted set of permanently failed jobs; score = time of death in epoch seconds.
pub const DEAD_SET: &str = "dead";

/// Candidate keys for the worker-process roster, in probe priority order.
/// Producers of different vintages register under different names; the first
/// candidate with a non-empty set wins and candidates are never merged.
pub const ROSTER_CANDIDATES: [&str; 4] = ["processes", "workers", "sidekiq:processes", "sidekiq:workers"];

/// Field of the per-process hash holding the JSON metadata payload.
pub const PROCESS_INFO_FIELD: &str = "info";

/// Field of the per-process hash holding the busy-thread counter.
pub const PROCESS_BUSY_FIELD: &str = "busy";

/// Suffix appended to a process identity to form the current-work key.
pub const WORK_SUFFIX: &str = ":work";

/// Counter keys fetched by the stats query, in result order.
pub const STATS_KEYS: [&str; 9] = [
    "stat:processed",
    "stat:failed",
    "schedule_size",
    "retry_size",
    "dead_size",
    "processes_size",
    "workers_size",
    "enqueued",
    "default_queue_latency",
];

/// Prefix for metric counter keys: `metrics:{namespace}.{job}.{type}:{timestamp}`.
pub const METRICS_PREFIX: &str = "metrics:";

/// Redis key for the job list of the named queue.
pub fn queue(name: &str) -> String {
    format!("{QUEUE_PREFIX}{name}")
}

/// Redis key for the current-work payload of the given process identity.
pub fn work(identity: &str) -> String {
    format!("{identity}{WORK_SUFFIX}")
}

/// Wildcard pattern matching every metric counter key.
pub fn metrics_pattern() -> String {
    format!("{METRICS_PREFIX}*")
}

/// Trailing timestamp segment of a metric key, if present.
///
/// Metric keys end in `:{timestamp}`; the segment after the last colon is
/// returned verbatim so callers can bucket without re-parsing the key. Only
/// an all-digit segment qualifies: a key without a trailing timestamp must
/// not surface a name fragment as one.
pub fn metric_timestamp(key: &str) -> Option<&str> {
    key.rsplit_once(':')
        .map(|(_, ts)| ts)
        .filter(|ts| !ts.is_empty() && ts.bytes().all(|byte| byte.is_ascii_digit()))
}
