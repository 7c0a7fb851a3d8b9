//! Error types for allocator and scheduler operations.

use thiserror::Error;

use crate::core::memory_pool::SlotId;
use crate::core::job::JobState;

/// Recoverable errors produced by pool and scheduler components.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A new segment could not be reserved.
    #[error("resource exhausted: could not reserve a segment of {slots} slots")]
    ResourceExhausted {
        /// Number of slots the segment was sized for.
        slots: usize,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Misuse of the allocation or dependency protocol.
///
/// These are programmer errors. They are never returned; they are reported
/// through [`fatal`], which logs and then panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A slot was freed while it was not allocated.
    #[error("double free of slot {0}")]
    DoubleFree(SlotId),
    /// A pool was destroyed while slots were still allocated.
    #[error("freed nonempty pool: {live} slot(s) still allocated")]
    NonEmptyPool {
        /// Slots still allocated at teardown.
        live: usize,
    },
    /// A free-list handed out a slot that was already allocated.
    #[error("slot {0} is on a free-list but still allocated")]
    AllocatedSlotReissued(SlotId),
    /// A pool was used after `destroy`.
    #[error("pool used after it was destroyed")]
    PoolDestroyed,
    /// A handle refers to a segment its pool no longer has.
    #[error("slot {0} does not belong to a live segment of its pool")]
    ForeignSlot(SlotId),
    /// A completed child found its parent with nothing left to wait for.
    #[error("parent {0} has 0 dependencies where it should have at least 1, did a job run twice?")]
    ParentWithoutDependencies(SlotId),
    /// A job was enqueued when it was not in the `Created` state.
    #[error("job {id} queued while {state}")]
    QueuedTwice {
        /// The offending job.
        id: SlotId,
        /// The state it was in.
        state: JobState,
    },
    /// A worker popped a job that was not `Queued`.
    #[error("job {id} dequeued while {state}, did a job run twice?")]
    RanTwice {
        /// The offending job.
        id: SlotId,
        /// The state it was in.
        state: JobState,
    },
    /// A child already has a parent.
    #[error("job {0} already has a parent")]
    ParentAlreadySet(SlotId),
    /// A child was linked after it became visible to workers.
    #[error("job {id} linked as a child while {state}")]
    ChildAlreadyScheduled {
        /// The offending child.
        id: SlotId,
        /// The state it was in.
        state: JobState,
    },
    /// A parent was linked after it started running.
    #[error("job {id} linked as a parent while {state}")]
    ParentNotPending {
        /// The offending parent.
        id: SlotId,
        /// The state it was in.
        state: JobState,
    },
    /// A job handle was used after the job was freed.
    #[error("job {0} used after it was freed")]
    UseAfterFree(SlotId),
    /// A job was linked as its own child.
    #[error("job {0} cannot depend on itself")]
    SelfDependency(SlotId),
    /// A job already had a thread blocked in `wait` on it.
    #[error("job {id} waited on while {state}")]
    AlreadyWaited {
        /// The offending job.
        id: SlotId,
        /// The state it was in.
        state: JobState,
    },
    /// The host returned with jobs still queued.
    #[error("thread pool shut down with {remaining} job(s) still queued")]
    QueueNotDrained {
        /// Jobs left in the queue.
        remaining: usize,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Logs `violation` and panics.
///
/// With `panic = "abort"` this terminates the process; otherwise the panic
/// unwinds and releases every guard on the way out.
#[cold]
#[track_caller]
pub fn fatal(violation: ProtocolViolation) -> ! {
    tracing::error!(%violation, "protocol violation");
    panic!("{violation}");
}
