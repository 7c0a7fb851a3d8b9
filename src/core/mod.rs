//! Slot allocation, job graphs and the worker pool that runs them.

pub mod error;
pub mod job;
pub mod memory_pool;
mod segment;
pub mod thread_pool;

pub use error::{fatal, AppResult, PoolError, ProtocolViolation};
pub use job::{
    ControlGuard, Job, JobContext, JobControl, JobGuard, JobKind, JobPool, JobRef, JobState,
    ParentGuard, RunOutcome, Schedulable,
};
pub use memory_pool::{PoolStats, Slot, SlotGuard, SlotId, SlotPool, DEFAULT_SEGMENT_LEN};
pub use thread_pool::{HostStats, ThreadPool, DEFAULT_BATCH_SIZE};
