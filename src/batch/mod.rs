// ABOUTME: Batch queue node source: one scheduler job per node, PBS, LSF, and Grid Engine.
// ABOUTME: Exports the queue families, the submission protocol, and the adapter and source.

mod family;
mod job;
mod protocol;
mod source;
mod state;

pub use family::{Lsf, Pbs, QueueFamily, Sge, piped_submission};
pub use job::BatchJobDescriptor;
pub use protocol::{
    MONITOR_BREAKER, MonitorSettings, Monitoring, POLL_INTERVAL, Registered, Submission, Submitting,
    delete_job,
};
pub use source::{
    BatchQueueAdapter, BatchQueueSource, BatchSettings, BatchSlot, DEFAULT_BATCH_NODE_TIMEOUT,
};
pub use state::BatchState;
