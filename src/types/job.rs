use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{DecodeError, LensError};
use crate::keys;

/// A background job record read from the store
///
/// Jobs are produced by external producers; this crate only reads them and,
/// for retry, reconstructs a queue-shaped payload from these fields. A job
/// resides in exactly one collection at a time: a queue list, or the
/// schedule/retry/dead sorted set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Globally unique identifier, immutable once created
    pub jid: String,

    /// Queue the job belongs to, when the record names one
    pub queue: Option<String>,

    /// Job class/type name; empty when the record omits it
    pub class: String,

    /// Opaque argument list, passed through verbatim
    pub args: Value,

    /// When the job was created
    pub created_at: Option<DateTime<Utc>>,

    /// When the job was pushed onto its queue
    pub enqueued_at: Option<DateTime<Utc>>,

    /// When the job is due to run (schedule set score)
    pub scheduled_at: Option<DateTime<Utc>>,

    /// When the next retry is due (retry set score)
    pub retried_at: Option<DateTime<Utc>>,

    /// When the job failed for good (dead set score)
    pub failed_at: Option<DateTime<Utc>>,

    /// Retry directive from the producer: a bool or a max-attempt count
    pub retry: Option<Value>,

    /// Number of attempts made so far
    pub retry_count: Option<u64>,

    /// Class of the error that failed the job
    pub error_class: Option<String>,

    /// Message of the error that failed the job
    pub error_message: Option<String>,

    /// Backtrace captured at failure, passed through verbatim
    pub backtrace: Option<Value>,
}

/// Raw shape of a serialized job record; every field except jid is optional
/// so one producer quirk cannot sink a whole listing.
#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(default)]
    jid: Option<String>,
    #[serde(default)]
    queue: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    args: Option<Value>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    enqueued_at: Option<Value>,
    #[serde(default)]
    retried_at: Option<Value>,
    #[serde(default)]
    failed_at: Option<Value>,
    #[serde(default)]
    retry: Option<Value>,
    #[serde(default)]
    retry_count: Option<Value>,
    #[serde(default)]
    error_class: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    backtrace: Option<Value>,
}

impl Job {
    /// Decode a serialized job record
    ///
    /// Timestamps are epoch-second numbers but numeric strings are tolerated.
    /// Only a missing/empty jid or invalid JSON fail the decode.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let raw: RawJob = serde_json::from_str(raw)?;
        let jid = raw.jid.filter(|jid| !jid.is_empty()).ok_or(DecodeError::MissingJid)?;

        Ok(Self {
            jid,
            queue: raw.queue,
            class: raw.class.unwrap_or_default(),
            args: raw.args.unwrap_or_else(|| Value::Array(Vec::new())),
            created_at: raw.created_at.as_ref().and_then(epoch_value),
            enqueued_at: raw.enqueued_at.as_ref().and_then(epoch_value),
            scheduled_at: None,
            retried_at: raw.retried_at.as_ref().and_then(epoch_value),
            failed_at: raw.failed_at.as_ref().and_then(epoch_value),
            retry: raw.retry,
            retry_count: raw.retry_count.as_ref().and_then(Value::as_u64),
            error_class: raw.error_class,
            error_message: raw.error_message,
            backtrace: raw.backtrace,
        })
    }

    /// Overwrite the time of interest with a sorted-set score
    ///
    /// The score is authoritative for sorted-set sources; any embedded
    /// payload timestamp for the same event is stale by contract.
    pub fn apply_score(&mut self, source: &JobSource, at: DateTime<Utc>) {
        match source {
            JobSource::Scheduled => self.scheduled_at = Some(at),
            JobSource::Retry => self.retried_at = Some(at),
            JobSource::Dead => self.failed_at = Some(at),
            JobSource::Queue(_) => {}
        }
    }

    /// Queue-shaped payload for re-enqueueing this job
    ///
    /// Keeps the original jid, class, args, creation time and retry
    /// directive; stamps a fresh enqueue time.
    pub fn requeue_payload(&self, queue: &str, now: DateTime<Utc>) -> String {
        let created_at = self.created_at.map(epoch_f64).unwrap_or_else(|| epoch_f64(now));
        let mut record = serde_json::json!({
            "jid": self.jid,
            "class": self.class,
            "args": self.args,
            "queue": queue,
            "created_at": created_at,
            "enqueued_at": epoch_f64(now),
            "retry": self.retry.clone().unwrap_or(Value::Bool(true)),
        });
        if let Some(count) = self.retry_count {
            record["retry_count"] = Value::from(count);
        }
        record.to_string()
    }

    /// Compact rendering of the argument list for display purposes
    pub fn display_args(&self) -> String {
        self.args.to_string()
    }
}

/// The collection a job mutation targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    /// A named queue list
    Queue(String),

    /// The schedule sorted set
    Scheduled,

    /// The retry sorted set
    Retry,

    /// The dead sorted set
    Dead,
}

impl JobSource {
    /// Redis key of the backing collection
    pub fn key(&self) -> String {
        match self {
            Self::Queue(name) => keys::queue(name),
            Self::Scheduled => keys::SCHEDULE_SET.to_string(),
            Self::Retry => keys::RETRY_SET.to_string(),
            Self::Dead => keys::DEAD_SET.to_string(),
        }
    }

    /// Whether the backing collection is a sorted set (vs a list)
    pub fn is_sorted_set(&self) -> bool {
        !matches!(self, Self::Queue(_))
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(name) => write!(f, "queue:{name}"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Retry => write!(f, "retry"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl FromStr for JobSource {
    type Err = LensError;

    /// Parse a caller-supplied source name: `scheduled`, `retry`, `dead`, or
    /// `queue:{name}`. Anything else is a caller error.
    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "scheduled" | "schedule" => Ok(Self::Scheduled),
            "retry" => Ok(Self::Retry),
            "dead" => Ok(Self::Dead),
            other => match other.strip_prefix("queue:") {
                Some(name) if !name.is_empty() => Ok(Self::Queue(name.to_string())),
                _ => Err(LensError::InvalidSource(source.to_string())),
            },
        }
    }
}

/// Epoch-second value (number or numeric string) to a UTC timestamp
pub(crate) fn epoch_value(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    epoch_secs(secs)
}

/// Epoch seconds (fractional) to a UTC timestamp
pub(crate) fn epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

/// UTC timestamp to fractional epoch seconds, the producers' wire format
pub(crate) fn epoch_f64(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> String {
        serde_json::json!({
            "jid": "b4a577edbccf1d805744efa9",
            "class": "HardJob",
            "args": ["alice", 42],
            "queue": "default",
            "created_at": 1_700_000_000.25,
            "enqueued_at": 1_700_000_001.5,
            "retry": true,
            "retry_count": 2,
            "error_class": "RuntimeError",
            "error_message": "boom",
        })
        .to_string()
    }

    #[test]
    fn test_decode_full_record() {
        let job = Job::decode(&sample_record()).unwrap();
        assert_eq!(job.jid, "b4a577edbccf1d805744efa9");
        assert_eq!(job.class, "HardJob");
        assert_eq!(job.queue.as_deref(), Some("default"));
        assert_eq!(job.args, serde_json::json!(["alice", 42]));
        assert_eq!(job.created_at.unwrap().timestamp_millis(), 1_700_000_000_250);
        assert_eq!(job.enqueued_at.unwrap().timestamp_millis(), 1_700_000_001_500);
        assert_eq!(job.retry_count, Some(2));
        assert_eq!(job.error_class.as_deref(), Some("RuntimeError"));
    }

    #[test]
    fn test_decode_requires_jid() {
        assert!(matches!(
            Job::decode(r#"{"class": "HardJob"}"#),
            Err(DecodeError::MissingJid)
        ));
        assert!(matches!(
            Job::decode(r#"{"jid": ""}"#),
            Err(DecodeError::MissingJid)
        ));
        assert!(matches!(Job::decode("not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_tolerates_stringly_timestamps() {
        let job = Job::decode(r#"{"jid": "x", "created_at": "1700000000"}"#).unwrap();
        assert_eq!(job.created_at.unwrap().timestamp(), 1_700_000_000);

        // Garbage timestamps degrade to None, never fail the decode
        let job = Job::decode(r#"{"jid": "x", "created_at": [1, 2]}"#).unwrap();
        assert!(job.created_at.is_none());
    }

    #[test]
    fn test_decode_defaults_args_to_empty_list() {
        let job = Job::decode(r#"{"jid": "x"}"#).unwrap();
        assert_eq!(job.args, serde_json::json!([]));
        assert_eq!(job.class, "");
    }

    #[test]
    fn test_apply_score_sets_time_for_source() {
        let mut job = Job::decode(r#"{"jid": "x", "failed_at": 1.0}"#).unwrap();
        let score_time = epoch_secs(1_700_000_000.0).unwrap();

        job.apply_score(&JobSource::Dead, score_time);
        assert_eq!(job.failed_at.unwrap().timestamp_millis(), 1_700_000_000_000);

        job.apply_score(&JobSource::Scheduled, score_time);
        assert_eq!(job.scheduled_at, Some(score_time));
    }

    #[test]
    fn test_requeue_payload_preserves_identity_and_restamps() {
        let job = Job::decode(&sample_record()).unwrap();
        let now = epoch_secs(1_800_000_000.0).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(&job.requeue_payload("default", now)).unwrap();

        assert_eq!(payload["jid"], "b4a577edbccf1d805744efa9");
        assert_eq!(payload["class"], "HardJob");
        assert_eq!(payload["queue"], "default");
        assert_eq!(payload["enqueued_at"], serde_json::json!(1_800_000_000.0));
        assert_eq!(payload["created_at"], serde_json::json!(1_700_000_000.25));
        assert_eq!(payload["retry"], serde_json::json!(true));
        assert_eq!(payload["retry_count"], serde_json::json!(2));
    }

    #[test]
    fn test_requeue_payload_defaults_retry_to_true() {
        let job = Job::decode(r#"{"jid": "x", "class": "HardJob"}"#).unwrap();
        let now = Utc::now();
        let payload: serde_json::Value =
            serde_json::from_str(&job.requeue_payload("low", now)).unwrap();
        assert_eq!(payload["retry"], serde_json::json!(true));
        assert!(payload.get("retry_count").is_none());
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("retry".parse::<JobSource>().unwrap(), JobSource::Retry);
        assert_eq!("dead".parse::<JobSource>().unwrap(), JobSource::Dead);
        assert_eq!("scheduled".parse::<JobSource>().unwrap(), JobSource::Scheduled);
        assert_eq!(
            "queue:default".parse::<JobSource>().unwrap(),
            JobSource::Queue("default".to_string())
        );
        assert!(matches!(
            "limbo".parse::<JobSource>(),
            Err(LensError::InvalidSource(_))
        ));
        assert!(matches!(
            "queue:".parse::<JobSource>(),
            Err(LensError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_source_keys() {
        assert_eq!(JobSource::Queue("default".into()).key(), "queue:default");
        assert_eq!(JobSource::Retry.key(), "retry");
        assert_eq!(JobSource::Dead.key(), "dead");
        assert_eq!(JobSource::Scheduled.key(), "schedule");
        assert!(JobSource::Retry.is_sorted_set());
        assert!(!JobSource::Queue("default".into()).is_sorted_set());
    }
}
