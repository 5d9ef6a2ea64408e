//! # queue-lens: Batched, Atomic Job-Queue Inspection over Redis
//!
//! queue-lens reads and mutates background-job queue state stored in Redis
//! under the Sidekiq key convention: queue lists, the schedule/retry/dead
//! sorted sets, worker-process registries and aggregate counters. It is the
//! data layer for inspection tooling; it does not process jobs itself.
//!
//! ## Design
//!
//! - **One connection per server**: [`ConnectionRegistry`] owns a live
//!   multiplexed connection per configured server, tracks its state, probes
//!   liveness with a bounded timeout and auto-reconnects on a fixed delay.
//!   Status changes are broadcast to subscribers.
//! - **O(1) round trips**: [`StoreClient`] batches per-collection commands
//!   into pipelines, so enumerating N queues or N workers costs the same
//!   number of network round trips as enumerating one.
//! - **Atomic find-and-remove**: deletions locate a job by its `jid` inside
//!   large unindexed lists and sorted sets with server-side Lua, so no
//!   concurrent mutator can race the scan against the removal.
//! - **Lenient reads**: a malformed stored record is dropped and logged,
//!   never the reason a whole listing fails.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use queue_lens::prelude::*;
//!
//! # async fn example() -> queue_lens::LensResult<()> {
//! let registry = ConnectionRegistry::new();
//! let server = ServerDescriptor::new("localhost");
//! registry.connect(&server).await?;
//!
//! let client = StoreClient::new(registry.clone());
//! let stats = client.stats(&server).await?;
//! println!("{} processed, {} dead", stats.processed, stats.dead);
//!
//! for queue in client.queues(&server).await? {
//!     println!("{}: {} pending, {:.1}s latency", queue.name, queue.size, queue.latency_secs);
//! }
//!
//! registry.dispose();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod registry;
pub mod types;

pub use client::{MetricsAggregator, StoreClient};
pub use config::ServersConfig;
pub use error::{DecodeError, LensError, LensResult};
pub use registry::ConnectionRegistry;
pub use types::{
    ConnectionEvent, ConnectionState, CurrentWork, Job, JobSource, MetricSample, QueueInfo,
    ServerDescriptor, Stats, WorkerProcess,
};

/// Everything a consumer of the inspection layer typically needs
pub mod prelude {
    pub use crate::client::{MetricsAggregator, StoreClient};
    pub use crate::config::ServersConfig;
    pub use crate::error::{LensError, LensResult};
    pub use crate::registry::ConnectionRegistry;
    pub use crate::types::{
        ConnectionEvent, ConnectionState, Job, JobSource, QueueInfo, ServerDescriptor, Stats,
        WorkerProcess,
    };
}
