//! Typed job pools, job handles and dependency edges.
//!
//! A job kind is a type implementing [`JobKind`]: it names the argument type
//! co-allocated with each job and the function a worker runs. Each kind gets
//! its own [`JobPool`], a [`SlotPool`] whose slots hold a [`JobControl`]
//! block followed by the argument.
//!
//! Jobs form a graph whose edges point from child to parent. A parent's
//! `pending` count is the number of children that must finish before it
//! becomes runnable.
//!
//! # Building a graph
//!
//! A freshly allocated job is reachable only through the handle `alloc`
//! returned. The allocating code links its children and parent while it is
//! still in that state, and only then publishes it, either by
//! [`ThreadPool::add_job`] or by letting a child's completion enqueue it.
//! Linking a child that has already been published is a fatal
//! [`ProtocolViolation::ChildAlreadyScheduled`].
//!
//! ```
//! use prometheus_job_pool::{JobContext, JobKind, JobPool, ThreadPool};
//!
//! struct Hello;
//!
//! impl JobKind for Hello {
//!     type Arg = u32;
//!
//!     fn run(cx: JobContext<'_, Self>) {
//!         assert_eq!(*cx.arg, 7);
//!         cx.pool.quit();
//!     }
//! }
//!
//! let pool = JobPool::<Hello>::new();
//! let job = pool.alloc(7)?;
//! ThreadPool::host(2, &job)?;
//! pool.destroy();
//! # Ok::<(), prometheus_job_pool::PoolError>(())
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::trace;

use crate::config::PoolConfig;
use crate::core::error::{fatal, PoolError, ProtocolViolation};
use crate::core::memory_pool::{PoolStats, Slot, SlotGuard, SlotId, SlotPool};
use crate::core::thread_pool::ThreadPool;
use crate::monitor::MappedMutexGuard;

/// A kind of job: its argument type and the function workers run for it.
pub trait JobKind: Sized + 'static {
    /// Argument co-allocated with each job. Reset to its default on
    /// allocation.
    type Arg: Default + Send + 'static;

    /// Runs one job.
    ///
    /// The job's own monitor is held for the duration of the call, so
    /// `cx.this.lock()` would deadlock; everything the job owns is reachable
    /// through `cx.arg`.
    fn run(cx: JobContext<'_, Self>);
}

/// Everything a running job is handed.
pub struct JobContext<'a, K: JobKind> {
    /// The job being run.
    pub this: &'a Job<K>,
    /// Its parent, if one was linked.
    pub parent: Option<&'a JobRef>,
    /// The thread pool running it.
    pub pool: &'a ThreadPool,
    /// The job's argument.
    pub arg: &'a mut K::Arg,
    /// Whether [`ThreadPool::quit`] had been called when this job's batch
    /// was taken from the queue.
    pub should_quit: bool,
}

/// Scheduling lifecycle of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Allocated and not yet in the queue.
    #[default]
    Created,
    /// In the thread pool's queue.
    Queued,
    /// Being run by a worker.
    Running,
    /// Its function has returned.
    Finished,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Scheduling fields every job carries ahead of its argument.
///
/// Only mutated while the job's monitor is held.
#[derive(Debug, Default)]
pub struct JobControl {
    pub(crate) pending: usize,
    pub(crate) parent: Option<JobRef>,
    pub(crate) waited: bool,
    /// A thread is blocked in `ThreadPool::wait` on this job.
    pub(crate) waiter: bool,
    pub(crate) state: JobState,
}

impl JobControl {
    /// Children that have not finished yet.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.pending
    }

    /// Whether a parent has been linked.
    #[must_use]
    pub const fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Whether a thread has committed to wait on this job, so workers leave
    /// it allocated after it runs.
    #[must_use]
    pub const fn waited(&self) -> bool {
        self.waited
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }
}

/// Slot payload of a job: control block, then the argument.
#[derive(Debug, Default)]
pub(crate) struct JobSlot<A> {
    control: JobControl,
    arg: A,
}

/// Result of handing a job to a worker.
#[derive(Debug)]
pub enum RunOutcome {
    /// The function ran; its parent (if any) must be told.
    Completed {
        /// The parent that was linked to the job.
        parent: Option<JobRef>,
    },
    /// The job still had pending children and went back to `Created`.
    Skipped,
}

/// Type-erased view of a job, used for parent links and the queue.
pub trait Schedulable: Send + Sync + 'static {
    /// Position of the job's slot in its pool.
    fn id(&self) -> SlotId;

    /// Name of the job kind, for logs.
    fn kind(&self) -> &'static str;

    /// Locks the job's monitor, exposing only its control block.
    fn lock_control(&self) -> MappedMutexGuard<'_, JobControl>;

    /// Runs the job if it is runnable. Called by workers.
    fn run(&self, pool: &ThreadPool, should_quit: bool) -> RunOutcome;

    /// Address of the job's slot; equal for handles to the same job.
    fn addr(&self) -> *const ();

    /// Whether the job this handle was issued for has not been freed yet.
    fn is_allocated(&self) -> bool;
}

/// Shared, type-erased handle to a job of any kind.
#[derive(Clone)]
pub struct JobRef(Arc<dyn Schedulable>);

impl Deref for JobRef {
    type Target = dyn Schedulable;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRef")
            .field("id", &self.0.id())
            .field("kind", &self.0.kind())
            .finish()
    }
}

impl JobRef {
    /// Locks the job's monitor.
    pub fn lock(&self) -> ControlGuard<'_> {
        ControlGuard {
            job: self,
            control: self.0.lock_control(),
        }
    }

    /// Returns `true` if `other` is the same job.
    #[must_use]
    pub fn same_job(&self, other: &dyn Schedulable) -> bool {
        std::ptr::eq(self.0.addr(), other.addr())
    }
}

/// Links `child` under the job whose control block is `parent_control`.
///
/// The parent's monitor is held by the caller. A parent that is running or
/// finished would never be queued again, and one that was freed must not be.
fn link_child(parent: &JobRef, parent_control: &mut JobControl, child: &dyn Schedulable) {
    if !parent.is_allocated() {
        fatal(ProtocolViolation::UseAfterFree(parent.id()));
    }
    if !matches!(parent_control.state, JobState::Created | JobState::Queued) {
        fatal(ProtocolViolation::ParentNotPending {
            id: parent.id(),
            state: parent_control.state,
        });
    }
    if parent.same_job(child) {
        fatal(ProtocolViolation::SelfDependency(child.id()));
    }

    let mut child_control = child.lock_control();
    if !child.is_allocated() {
        fatal(ProtocolViolation::UseAfterFree(child.id()));
    }
    if child_control.parent.is_some() {
        fatal(ProtocolViolation::ParentAlreadySet(child.id()));
    }
    if child_control.state != JobState::Created {
        fatal(ProtocolViolation::ChildAlreadyScheduled {
            id: child.id(),
            state: child_control.state,
        });
    }
    child_control.parent = Some(parent.clone());
    drop(child_control);

    parent_control.pending += 1;
    trace!(parent = %parent.id(), child = %child.id(), pending = parent_control.pending, "child linked");
}

/// A held job monitor that can register children.
pub trait ParentGuard {
    /// Makes `child` a dependency of the locked job.
    ///
    /// `child` must not have been published yet.
    fn add_child(&mut self, child: &dyn Schedulable);
}

/// A held monitor of a type-erased job.
pub struct ControlGuard<'a> {
    job: &'a JobRef,
    pub(crate) control: MappedMutexGuard<'a, JobControl>,
}

impl Deref for ControlGuard<'_> {
    type Target = JobControl;

    fn deref(&self) -> &JobControl {
        &self.control
    }
}

impl ParentGuard for ControlGuard<'_> {
    fn add_child(&mut self, child: &dyn Schedulable) {
        link_child(self.job, &mut self.control, child);
    }
}

/// A job of kind `K`. Cloning the handle does not copy the job.
pub struct Job<K: JobKind> {
    slot: Slot<JobSlot<K::Arg>>,
}

impl<K: JobKind> Clone for Job<K> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<K: JobKind> fmt::Debug for Job<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("kind", &std::any::type_name::<K>())
            .field("id", &self.id())
            .finish()
    }
}

impl<K: JobKind> Job<K> {
    /// Position of the job's slot in its pool.
    #[must_use]
    pub fn id(&self) -> SlotId {
        self.slot.id()
    }

    /// Whether this job has not been freed yet.
    ///
    /// Turns `false` when the job is freed and stays `false` for this handle
    /// even if its slot is reused by a later allocation.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.slot.is_allocated()
    }

    /// Acquires the job's monitor.
    pub fn lock(&self) -> JobGuard<'_, K> {
        JobGuard {
            job: self,
            guard: self.slot.lock(),
        }
    }

    /// The pool this job was allocated from.
    #[must_use]
    pub fn pool(&self) -> JobPool<K> {
        JobPool {
            slots: self.slot.pool(),
        }
    }

    /// Allocates another job of the same kind from the same pool.
    ///
    /// # Errors
    ///
    /// Same as [`SlotPool::alloc`].
    pub fn alloc_peer(&self, arg: K::Arg) -> Result<Self, PoolError> {
        self.pool().alloc(arg)
    }

    /// Type-erased handle to this job.
    #[must_use]
    pub fn erase(&self) -> JobRef {
        JobRef(Arc::new(self.clone()))
    }

    /// Makes this job a dependency of the job locked by `parent`.
    pub fn add_parent(&self, parent: &mut impl ParentGuard) {
        parent.add_child(self);
    }
}

impl<K: JobKind> Schedulable for Job<K> {
    fn id(&self) -> SlotId {
        self.slot.id()
    }

    fn kind(&self) -> &'static str {
        std::any::type_name::<K>()
    }

    fn lock_control(&self) -> MappedMutexGuard<'_, JobControl> {
        self.slot.lock().map(|slot| &mut slot.control)
    }

    fn run(&self, pool: &ThreadPool, should_quit: bool) -> RunOutcome {
        let mut guard = self.slot.lock();
        let id = self.id();

        if !self.slot.is_allocated() {
            fatal(ProtocolViolation::UseAfterFree(id));
        }
        if guard.control.pending > 0 {
            // Queued before its children were all linked; a child's
            // completion will queue it again.
            guard.control.state = JobState::Created;
            trace!(job = %id, pending = guard.control.pending, "job skipped");
            return RunOutcome::Skipped;
        }
        if guard.control.state != JobState::Queued {
            fatal(ProtocolViolation::RanTwice {
                id,
                state: guard.control.state,
            });
        }

        guard.control.state = JobState::Running;
        let parent = guard.control.parent.clone();
        trace!(job = %id, kind = self.kind(), "job running");
        {
            let JobSlot { arg, .. } = &mut *guard;
            K::run(JobContext {
                this: self,
                parent: parent.as_ref(),
                pool,
                arg,
                should_quit,
            });
        }
        guard.control.state = JobState::Finished;
        guard.control.parent = None;

        if guard.control.waited {
            guard.broadcast();
            drop(guard);
        } else {
            guard.free();
        }
        RunOutcome::Completed { parent }
    }

    fn addr(&self) -> *const () {
        self.slot.addr()
    }

    fn is_allocated(&self) -> bool {
        Self::is_allocated(self)
    }
}

/// A held job monitor.
pub struct JobGuard<'a, K: JobKind> {
    job: &'a Job<K>,
    guard: SlotGuard<'a, JobSlot<K::Arg>>,
}

impl<K: JobKind> JobGuard<'_, K> {
    /// The job's argument.
    #[must_use]
    pub fn arg(&self) -> &K::Arg {
        &self.guard.arg
    }

    /// The job's argument, mutably.
    pub fn arg_mut(&mut self) -> &mut K::Arg {
        &mut self.guard.arg
    }

    /// The job's scheduling fields.
    #[must_use]
    pub fn control(&self) -> &JobControl {
        &self.guard.control
    }

    /// Makes `child` a dependency of this job.
    ///
    /// `child` must not have been published yet.
    pub fn add_child(&mut self, child: &dyn Schedulable) {
        let parent = self.job.erase();
        link_child(&parent, &mut self.guard.control, child);
    }

    /// Commits to a later [`ThreadPool::wait`] on this job.
    ///
    /// The worker that runs the job then leaves it allocated for the waiter
    /// to free. Needed when the job may run before `wait` gets to lock it.
    pub fn mark_waited(&mut self) {
        if !self.job.is_allocated() {
            fatal(ProtocolViolation::UseAfterFree(self.job.id()));
        }
        self.guard.control.waited = true;
    }

    /// Returns the job's memory to its pool.
    pub fn free(self) {
        self.guard.free();
    }

    pub(crate) fn control_mut(&mut self) -> &mut JobControl {
        &mut self.guard.control
    }

    /// Blocks until a worker marks the job finished.
    pub(crate) fn wait_until_finished(&mut self) {
        self.guard
            .wait_while(|slot| slot.control.state != JobState::Finished);
    }
}

impl<K: JobKind> ParentGuard for JobGuard<'_, K> {
    fn add_child(&mut self, child: &dyn Schedulable) {
        Self::add_child(self, child);
    }
}

/// Pool of jobs of kind `K`.
pub struct JobPool<K: JobKind> {
    slots: SlotPool<JobSlot<K::Arg>>,
}

impl<K: JobKind> Clone for JobPool<K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<K: JobKind> fmt::Debug for JobPool<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPool")
            .field("kind", &std::any::type_name::<K>())
            .field("slots", &self.slots)
            .finish()
    }
}

impl<K: JobKind> Default for JobPool<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: JobKind> JobPool<K> {
    /// Creates an empty job pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: SlotPool::new(),
        }
    }

    /// Creates an empty job pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn with_config(config: &PoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            slots: SlotPool::with_config(config)?,
        })
    }

    /// Allocates a job carrying `arg`, in the `Created` state.
    ///
    /// # Errors
    ///
    /// Same as [`SlotPool::alloc`].
    pub fn alloc(&self, arg: K::Arg) -> Result<Job<K>, PoolError> {
        let job = Job {
            slot: self.slots.alloc()?,
        };
        *job.lock().arg_mut() = arg;
        Ok(job)
    }

    /// Segment and slot counts of the underlying pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.slots.stats()
    }

    /// Tears the pool down. Every job must have been freed.
    pub fn destroy(self) {
        self.slots.destroy();
    }
}
