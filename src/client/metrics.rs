//! Metric counter discovery and batch fetch.
//!
//! Counter keys live under a wildcard namespace and are discovered with an
//! incremental SCAN cursor, never a blocking full-keyspace listing. Values
//! are then fetched in bounded-size MGET chunks rather than one request per
//! key. Grouping by namespace or job class is a presentation concern and
//! stays out of this crate.

use tracing::debug;

use crate::error::{LensError, LensResult};
use crate::registry::ConnectionRegistry;
use crate::types::{MetricSample, ServerDescriptor};

/// Cursor batch hint for key discovery
pub const SCAN_COUNT: usize = 1000;

/// Keys fetched per value batch
pub const FETCH_CHUNK: usize = 1000;

/// Discovers and batch-fetches counter records under a wildcard namespace
#[derive(Clone)]
pub struct MetricsAggregator {
    registry: ConnectionRegistry,
}

impl MetricsAggregator {
    /// Create an aggregator over an existing registry
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Collect every counter whose key matches the pattern
    ///
    /// Results are sorted by key so repeated collections over unchanged data
    /// compare equal. Counters with missing or unparsable values read as 0.
    pub async fn collect(&self, descriptor: &ServerDescriptor, pattern: &str) -> LensResult<Vec<MetricSample>> {
        let mut conn = self.registry.get_connection(descriptor)?;

        let mut found: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|err| self.store_err(descriptor, err))?;
            found.extend(page);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        found.sort();
        found.dedup();

        let mut samples = Vec::with_capacity(found.len());
        for chunk in found.chunks(FETCH_CHUNK) {
            let values: Vec<Option<String>> = redis::cmd("MGET")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(|err| self.store_err(descriptor, err))?;
            for (key, value) in chunk.iter().zip(&values) {
                samples.push(MetricSample::new(key.clone(), value.as_deref()));
            }
        }

        debug!(
            "collected {} metric counters matching {} on {}",
            samples.len(),
            pattern,
            descriptor.display_name()
        );
        Ok(samples)
    }

    fn store_err(&self, descriptor: &ServerDescriptor, err: redis::RedisError) -> LensError {
        if err.is_io_error() || err.is_connection_dropped() {
            self.registry.mark_failed(descriptor);
        }
        LensError::Store {
            server: descriptor.display_name(),
            action: "metrics".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_requires_connected_state() {
        let aggregator = MetricsAggregator::new(ConnectionRegistry::new());
        let descriptor = ServerDescriptor::new("127.0.0.1");
        let err = aggregator
            .collect(&descriptor, &crate::keys::metrics_pattern())
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::NotConnected { .. }));
    }

    #[test]
    fn test_chunk_sizes_are_bounded() {
        assert_eq!(FETCH_CHUNK, 1000);
        assert_eq!(SCAN_COUNT, 1000);
    }
}
