use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::job::{epoch_value, Job};
use crate::error::DecodeError;
use crate::keys;

/// A registered worker process, read from its roster hash
///
/// Worker records are ephemeral: external processing agents write and expire
/// them, and this crate is strictly read-only toward them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProcess {
    /// Roster identity, usually `{hostname}:{pid}:{nonce}`
    pub identity: String,

    /// Host the process runs on
    pub hostname: Option<String>,

    /// Operating system process id
    pub pid: Option<u64>,

    /// Deployment tag, when the agent sets one
    pub tag: Option<String>,

    /// Queues the process consumes from
    pub queues: Vec<String>,

    /// Configured worker-thread count
    pub concurrency: Option<u64>,

    /// Number of threads currently executing a job
    pub busy: u64,

    /// When the process started
    pub started_at: Option<DateTime<Utc>>,

    /// The job currently being executed, for busy processes
    pub current_work: Option<CurrentWork>,
}

/// Metadata payload stored under the `info` field of the process hash
#[derive(Debug, Deserialize)]
struct ProcessInfo {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    pid: Option<u64>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    queues: Option<Vec<String>>,
    #[serde(default)]
    concurrency: Option<u64>,
    #[serde(default)]
    started_at: Option<Value>,
}

impl WorkerProcess {
    /// Build a worker from its roster identity and metadata hash
    ///
    /// A hash without a usable `info` payload is not a worker record; the
    /// caller skips it. The `busy` counter tolerates absence and garbage,
    /// reading as 0.
    pub fn from_hash(identity: &str, hash: &HashMap<String, String>) -> Result<Self, DecodeError> {
        let raw = hash
            .get(keys::PROCESS_INFO_FIELD)
            .filter(|info| !info.is_empty())
            .ok_or(DecodeError::MissingWorkerInfo)?;
        let info: ProcessInfo = serde_json::from_str(raw)?;

        let busy = hash
            .get(keys::PROCESS_BUSY_FIELD)
            .and_then(|busy| busy.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(Self {
            identity: identity.to_string(),
            hostname: info.hostname,
            pid: info.pid,
            tag: info.tag,
            queues: info.queues.unwrap_or_default(),
            concurrency: info.concurrency,
            busy,
            started_at: info.started_at.as_ref().and_then(epoch_value),
            current_work: None,
        })
    }

    /// Whether any thread of this process is executing a job
    pub fn is_busy(&self) -> bool {
        self.busy > 0
    }
}

/// The current-job envelope stored under `{identity}:work`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWork {
    /// Queue the running job was taken from
    pub queue: Option<String>,

    /// When the agent picked the job up
    pub run_at: Option<DateTime<Utc>>,

    /// The running job itself, when its payload decodes
    pub job: Option<Job>,
}

#[derive(Debug, Deserialize)]
struct RawWork {
    #[serde(default)]
    queue: Option<String>,
    #[serde(default)]
    run_at: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

impl CurrentWork {
    /// Decode a current-job envelope
    ///
    /// The embedded payload is either a JSON object or a doubly-encoded JSON
    /// string depending on agent version; both are accepted. A payload that
    /// fails to decode leaves `job` unset without failing the envelope.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let raw: RawWork = serde_json::from_str(raw)?;
        let job = match &raw.payload {
            Some(Value::String(inner)) => Job::decode(inner).ok(),
            Some(object @ Value::Object(_)) => Job::decode(&object.to_string()).ok(),
            _ => None,
        };
        Ok(Self {
            queue: raw.queue,
            run_at: raw.run_at.as_ref().and_then(epoch_value),
            job,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hash(busy: &str) -> HashMap<String, String> {
        let info = serde_json::json!({
            "hostname": "worker-1",
            "pid": 4321,
            "tag": "app",
            "queues": ["default", "mailers"],
            "concurrency": 10,
            "started_at": 1_700_000_000.0,
        })
        .to_string();
        HashMap::from([("info".to_string(), info), ("busy".to_string(), busy.to_string())])
    }

    #[test]
    fn test_worker_from_hash() {
        let worker = WorkerProcess::from_hash("worker-1:4321:abcd", &sample_hash("3")).unwrap();
        assert_eq!(worker.identity, "worker-1:4321:abcd");
        assert_eq!(worker.hostname.as_deref(), Some("worker-1"));
        assert_eq!(worker.pid, Some(4321));
        assert_eq!(worker.queues, vec!["default", "mailers"]);
        assert_eq!(worker.concurrency, Some(10));
        assert_eq!(worker.busy, 3);
        assert!(worker.is_busy());
        assert_eq!(worker.started_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_worker_busy_defaults_to_zero() {
        let mut hash = sample_hash("not-a-number");
        let worker = WorkerProcess::from_hash("id", &hash).unwrap();
        assert_eq!(worker.busy, 0);
        assert!(!worker.is_busy());

        hash.remove("busy");
        let worker = WorkerProcess::from_hash("id", &hash).unwrap();
        assert_eq!(worker.busy, 0);
    }

    #[test]
    fn test_worker_requires_info_payload() {
        let empty = HashMap::new();
        assert!(matches!(
            WorkerProcess::from_hash("id", &empty),
            Err(DecodeError::MissingWorkerInfo)
        ));

        let blank = HashMap::from([("info".to_string(), String::new())]);
        assert!(matches!(
            WorkerProcess::from_hash("id", &blank),
            Err(DecodeError::MissingWorkerInfo)
        ));
    }

    #[test]
    fn test_current_work_with_object_payload() {
        let raw = serde_json::json!({
            "queue": "default",
            "run_at": 1_700_000_000,
            "payload": {"jid": "abc", "class": "HardJob", "args": []},
        })
        .to_string();
        let work = CurrentWork::decode(&raw).unwrap();
        assert_eq!(work.queue.as_deref(), Some("default"));
        assert_eq!(work.run_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(work.job.unwrap().jid, "abc");
    }

    #[test]
    fn test_current_work_with_string_payload() {
        let raw = serde_json::json!({
            "queue": "default",
            "payload": r#"{"jid": "abc", "class": "HardJob"}"#,
        })
        .to_string();
        let work = CurrentWork::decode(&raw).unwrap();
        assert_eq!(work.job.unwrap().jid, "abc");
    }

    #[test]
    fn test_current_work_tolerates_bad_payload() {
        let work = CurrentWork::decode(r#"{"queue": "default", "payload": "not json"}"#).unwrap();
        assert!(work.job.is_none());
        assert_eq!(work.queue.as_deref(), Some("default"));
    }
}
