//! Data access client over the store.
//!
//! Every operation takes the server descriptor it targets and translates the
//! domain query into a minimal number of round trips: counters are fetched
//! with one MGET, per-queue stats ride a single pipeline regardless of queue
//! count, and worker enumeration is two-phase batched. Malformed stored
//! records never fail an operation; they are dropped and logged. Connection
//! and command failures always escalate with the server name and the
//! attempted action.

pub mod atomic;
pub mod metrics;

use chrono::Utc;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{LensError, LensResult};
use crate::keys;
use crate::registry::ConnectionRegistry;
use crate::types::job::epoch_secs;
use crate::types::{CurrentWork, Job, JobSource, MetricSample, QueueInfo, ServerDescriptor, Stats, WorkerProcess};

pub use metrics::MetricsAggregator;

/// Read/mutate client for queues, jobs, workers and stats
///
/// Holds no per-server state of its own: live handles come from the
/// [`ConnectionRegistry`], which also learns about transport-level failures
/// observed here so it can schedule reconnects.
#[derive(Clone)]
pub struct StoreClient {
    registry: ConnectionRegistry,
    metrics: MetricsAggregator,
}

impl StoreClient {
    /// Create a client over an existing registry
    pub fn new(registry: ConnectionRegistry) -> Self {
        let metrics = MetricsAggregator::new(registry.clone());
        Self { registry, metrics }
    }

    /// The registry this client draws connections from
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Aggregate counters, one batched multi-get
    ///
    /// Missing or unparsable counters read as 0 (0.0 for latency).
    pub async fn stats(&self, descriptor: &ServerDescriptor) -> LensResult<Stats> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys::STATS_KEYS[..])
            .query_async(&mut conn)
            .await
            .map_err(|err| self.store_err(descriptor, "stats", err))?;
        Ok(Stats::from_values(&values))
    }

    /// Enumerate queues with per-queue length and latency
    ///
    /// The queue-name set is read once; lengths and tail entries for every
    /// queue then ride one pipeline, never one round trip per queue. The
    /// result is sorted by name, ascending.
    pub async fn queues(&self, descriptor: &ServerDescriptor) -> LensResult<Vec<QueueInfo>> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let mut names: Vec<String> = conn
            .smembers(keys::QUEUES)
            .await
            .map_err(|err| self.store_err(descriptor, "queues", err))?;
        names.sort();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for name in &names {
            let key = keys::queue(name);
            pipe.cmd("LLEN").arg(&key);
            pipe.cmd("LRANGE").arg(&key).arg(-1).arg(-1);
        }
        let values: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| self.store_err(descriptor, "queues", err))?;

        let now = Utc::now();
        let mut queues = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            let size = values
                .get(index * 2)
                .and_then(|value| redis::from_redis_value::<u64>(value).ok())
                .unwrap_or(0);
            let tail: Vec<String> = values
                .get(index * 2 + 1)
                .and_then(|value| redis::from_redis_value(value).ok())
                .unwrap_or_default();
            let latency_secs = QueueInfo::latency_from_tail(tail.first().map(String::as_str), now);
            queues.push(QueueInfo { name, size, latency_secs });
        }
        debug!("enumerated {} queues on {}", queues.len(), descriptor.display_name());
        Ok(queues)
    }

    /// Jobs in a queue list for the `[start, stop]` window, head to tail
    pub async fn queue_jobs(
        &self,
        descriptor: &ServerDescriptor,
        name: &str,
        start: isize,
        stop: isize,
    ) -> LensResult<Vec<Job>> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let entries: Vec<String> = conn
            .lrange(keys::queue(name), start, stop)
            .await
            .map_err(|err| self.store_err(descriptor, "queue_jobs", err))?;

        let source = JobSource::Queue(name.to_string());
        Ok(decode_entries(descriptor, &source, entries.into_iter().map(|entry| (entry, None))))
    }

    /// Jobs in the schedule set for the `[start, stop]` window
    pub async fn scheduled_jobs(
        &self,
        descriptor: &ServerDescriptor,
        start: isize,
        stop: isize,
    ) -> LensResult<Vec<Job>> {
        self.sorted_jobs(descriptor, JobSource::Scheduled, start, stop).await
    }

    /// Jobs in the retry set for the `[start, stop]` window
    pub async fn retry_jobs(
        &self,
        descriptor: &ServerDescriptor,
        start: isize,
        stop: isize,
    ) -> LensResult<Vec<Job>> {
        self.sorted_jobs(descriptor, JobSource::Retry, start, stop).await
    }

    /// Jobs in the dead set for the `[start, stop]` window
    pub async fn dead_jobs(
        &self,
        descriptor: &ServerDescriptor,
        start: isize,
        stop: isize,
    ) -> LensResult<Vec<Job>> {
        self.sorted_jobs(descriptor, JobSource::Dead, start, stop).await
    }

    /// Bounded listing of a sorted-set collection
    ///
    /// The member score is the authoritative time value and overwrites any
    /// embedded payload timestamp for the same event.
    async fn sorted_jobs(
        &self,
        descriptor: &ServerDescriptor,
        source: JobSource,
        start: isize,
        stop: isize,
    ) -> LensResult<Vec<Job>> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let entries: Vec<(String, f64)> = conn
            .zrange_withscores(source.key(), start, stop)
            .await
            .map_err(|err| self.store_err(descriptor, "sorted_jobs", err))?;

        Ok(decode_entries(
            descriptor,
            &source,
            entries.into_iter().map(|(entry, score)| (entry, Some(score))),
        ))
    }

    /// Enumerate worker processes, two-phase batched
    ///
    /// Roster candidates are probed in one pipeline and the first non-empty
    /// roster wins; candidates are never merged. Phase one fetches every
    /// worker's metadata hash in one pipeline; phase two fetches current-job
    /// payloads for busy workers only, in one more. Three round trips total,
    /// independent of worker count. Workers without usable metadata are
    /// skipped.
    pub async fn workers(&self, descriptor: &ServerDescriptor) -> LensResult<Vec<WorkerProcess>> {
        let mut conn = self.registry.get_connection(descriptor)?;

        let mut roster_pipe = redis::pipe();
        for candidate in keys::ROSTER_CANDIDATES {
            roster_pipe.cmd("SMEMBERS").arg(candidate);
        }
        let rosters: Vec<Vec<String>> = roster_pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| self.store_err(descriptor, "workers", err))?;
        let Some(mut identities) = rosters.into_iter().find(|roster| !roster.is_empty()) else {
            return Ok(Vec::new());
        };
        identities.sort();

        let mut meta_pipe = redis::pipe();
        for identity in &identities {
            meta_pipe.cmd("HGETALL").arg(identity);
        }
        let hashes: Vec<HashMap<String, String>> = meta_pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| self.store_err(descriptor, "workers", err))?;

        let mut workers = Vec::with_capacity(identities.len());
        for (identity, hash) in identities.iter().zip(&hashes) {
            match WorkerProcess::from_hash(identity, hash) {
                Ok(worker) => workers.push(worker),
                Err(err) => warn!(
                    "skipping worker {} on {}: {}",
                    identity,
                    descriptor.display_name(),
                    err
                ),
            }
        }

        let busy: Vec<usize> = workers
            .iter()
            .enumerate()
            .filter(|(_, worker)| worker.is_busy())
            .map(|(index, _)| index)
            .collect();
        if !busy.is_empty() {
            let mut work_pipe = redis::pipe();
            for &index in &busy {
                work_pipe.cmd("GET").arg(keys::work(&workers[index].identity));
            }
            let payloads: Vec<Option<String>> = work_pipe
                .query_async(&mut conn)
                .await
                .map_err(|err| self.store_err(descriptor, "workers", err))?;
            for (&index, payload) in busy.iter().zip(&payloads) {
                workers[index].current_work = decode_work(descriptor, &workers[index].identity, payload.as_deref());
            }
        }

        debug!("enumerated {} workers on {}", workers.len(), descriptor.display_name());
        Ok(workers)
    }

    /// Look up one worker by identity: metadata and current work in one
    /// batched round trip. Empty metadata reads as not found.
    pub async fn worker(
        &self,
        descriptor: &ServerDescriptor,
        identity: &str,
    ) -> LensResult<Option<WorkerProcess>> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let (hash, payload): (HashMap<String, String>, Option<String>) = redis::pipe()
            .cmd("HGETALL")
            .arg(identity)
            .cmd("GET")
            .arg(keys::work(identity))
            .query_async(&mut conn)
            .await
            .map_err(|err| self.store_err(descriptor, "worker", err))?;

        match WorkerProcess::from_hash(identity, &hash) {
            Ok(mut worker) => {
                if worker.is_busy() {
                    worker.current_work = decode_work(descriptor, identity, payload.as_deref());
                }
                Ok(Some(worker))
            }
            Err(_) => Ok(None),
        }
    }

    /// Re-enqueue a job onto its destination queue
    ///
    /// Best-effort removal from the retry set and then the dead set, each
    /// independent of the other's outcome, followed unconditionally by a
    /// head push of the reconstructed record. Calling this on a job already
    /// absent from both sets still succeeds by re-enqueueing, which makes
    /// retry idempotent-safe. The destination queue name is added to the
    /// queue set so the pushed job stays visible to enumeration.
    pub async fn retry_job(&self, descriptor: &ServerDescriptor, job: &Job) -> LensResult<()> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let queue = job.queue.as_deref().unwrap_or("default");

        for key in [keys::RETRY_SET, keys::DEAD_SET] {
            match atomic::remove_from_sorted_set(&mut conn, key, &job.jid).await {
                Ok(found) => debug!("retry removal of {} from {}: found={}", job.jid, key, found),
                Err(err) => warn!(
                    "retry removal of {} from {} on {} failed: {}",
                    job.jid,
                    key,
                    descriptor.display_name(),
                    err
                ),
            }
        }

        let payload = job.requeue_payload(queue, Utc::now());
        redis::pipe()
            .cmd("SADD")
            .arg(keys::QUEUES)
            .arg(queue)
            .ignore()
            .cmd("LPUSH")
            .arg(keys::queue(queue))
            .arg(&payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| self.store_err(descriptor, "retry_job", err))?;
        debug!("re-enqueued {} onto {}", job.jid, queue);
        Ok(())
    }

    /// Atomically find and remove one job by jid from exactly one collection
    ///
    /// Returns whether a matching record was found and removed. Only the
    /// named source is touched; a job duplicated elsewhere stays put.
    pub async fn delete_job(
        &self,
        descriptor: &ServerDescriptor,
        jid: &str,
        source: &JobSource,
    ) -> LensResult<bool> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let key = source.key();
        let found = if source.is_sorted_set() {
            atomic::remove_from_sorted_set(&mut conn, &key, jid).await
        } else {
            atomic::remove_from_list(&mut conn, &key, jid).await
        }
        .map_err(|err| self.store_err(descriptor, "delete_job", err))?;
        debug!("delete of {} from {}: found={}", jid, source, found);
        Ok(found)
    }

    /// Drop an entire queue list in one command
    pub async fn clear_queue(&self, descriptor: &ServerDescriptor, name: &str) -> LensResult<()> {
        self.clear(descriptor, &keys::queue(name), "clear_queue").await
    }

    /// Drop the whole retry set in one command
    pub async fn clear_retry_set(&self, descriptor: &ServerDescriptor) -> LensResult<()> {
        self.clear(descriptor, keys::RETRY_SET, "clear_retry_set").await
    }

    /// Drop the whole dead set in one command
    pub async fn clear_dead_set(&self, descriptor: &ServerDescriptor) -> LensResult<()> {
        self.clear(descriptor, keys::DEAD_SET, "clear_dead_set").await
    }

    async fn clear(&self, descriptor: &ServerDescriptor, key: &str, action: &str) -> LensResult<()> {
        let mut conn = self.registry.get_connection(descriptor)?;
        let _: i64 = conn
            .del(key)
            .await
            .map_err(|err| self.store_err(descriptor, action, err))?;
        debug!("cleared {} on {}", key, descriptor.display_name());
        Ok(())
    }

    /// Discover and fetch metric counters matching a key pattern
    pub async fn metrics(
        &self,
        descriptor: &ServerDescriptor,
        pattern: &str,
    ) -> LensResult<Vec<MetricSample>> {
        self.metrics.collect(descriptor, pattern).await
    }

    /// Map a transport error, informing the registry of connection loss
    fn store_err(
        &self,
        descriptor: &ServerDescriptor,
        action: &str,
        err: redis::RedisError,
    ) -> LensError {
        if err.is_io_error() || err.is_connection_dropped() {
            self.registry.mark_failed(descriptor);
        }
        LensError::Store {
            server: descriptor.display_name(),
            action: action.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Decode raw entries into jobs, dropping and logging anything unparsable
///
/// For sorted-set sources the score accompanies each entry and overwrites
/// the corresponding job timestamp.
fn decode_entries(
    descriptor: &ServerDescriptor,
    source: &JobSource,
    entries: impl Iterator<Item = (String, Option<f64>)>,
) -> Vec<Job> {
    let mut jobs = Vec::new();
    for (entry, score) in entries {
        match Job::decode(&entry) {
            Ok(mut job) => {
                if let Some(at) = score.and_then(epoch_secs) {
                    job.apply_score(source, at);
                }
                jobs.push(job);
            }
            Err(err) => warn!(
                "dropping undecodable record in {} on {}: {}",
                source,
                descriptor.display_name(),
                err
            ),
        }
    }
    jobs
}

fn decode_work(
    descriptor: &ServerDescriptor,
    identity: &str,
    payload: Option<&str>,
) -> Option<CurrentWork> {
    let raw = payload?;
    match CurrentWork::decode(raw) {
        Ok(work) => Some(work),
        Err(err) => {
            warn!(
                "dropping undecodable work payload for {} on {}: {}",
                identity,
                descriptor.display_name(),
                err
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ServerDescriptor {
        ServerDescriptor::new("127.0.0.1")
    }

    #[tokio::test]
    async fn test_operations_require_connected_state() {
        let client = StoreClient::new(ConnectionRegistry::new());
        let descriptor = descriptor();

        assert!(matches!(
            client.stats(&descriptor).await,
            Err(LensError::NotConnected { .. })
        ));
        assert!(matches!(
            client.queues(&descriptor).await,
            Err(LensError::NotConnected { .. })
        ));
        assert!(matches!(
            client.workers(&descriptor).await,
            Err(LensError::NotConnected { .. })
        ));
        assert!(matches!(
            client.delete_job(&descriptor, "jid", &JobSource::Retry).await,
            Err(LensError::NotConnected { .. })
        ));
    }

    #[test_log::test]
    fn test_decode_entries_drops_bad_records_and_keeps_order() {
        let source = JobSource::Queue("default".to_string());
        let entries = vec![
            (r#"{"jid": "first"}"#.to_string(), None),
            ("not json".to_string(), None),
            (r#"{"jid": "second"}"#.to_string(), None),
        ];
        let jobs = decode_entries(&descriptor(), &source, entries.into_iter());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].jid, "first");
        assert_eq!(jobs[1].jid, "second");
    }

    #[test]
    fn test_decode_entries_score_wins_over_payload_time() {
        let entries = vec![(
            r#"{"jid": "x", "failed_at": 1000.0}"#.to_string(),
            Some(1_700_000_000.0),
        )];
        let jobs = decode_entries(&descriptor(), &JobSource::Dead, entries.into_iter());
        assert_eq!(jobs[0].failed_at.unwrap().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_work_tolerates_garbage() {
        assert!(decode_work(&descriptor(), "id", None).is_none());
        assert!(decode_work(&descriptor(), "id", Some("not json")).is_none());
        let work = decode_work(&descriptor(), "id", Some(r#"{"queue": "default"}"#)).unwrap();
        assert_eq!(work.queue.as_deref(), Some("default"));
    }
}
