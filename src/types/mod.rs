pub mod server;
pub mod job;
pub mod queue;
pub mod worker;
pub mod stats;
pub mod metric;

pub use server::{ConnectionEvent, ConnectionState, ServerDescriptor};
pub use job::{Job, JobSource};
pub use queue::QueueInfo;
pub use worker::{CurrentWork, WorkerProcess};
pub use stats::Stats;
pub use metric::MetricSample;
