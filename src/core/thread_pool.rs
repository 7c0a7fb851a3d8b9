//! Dependency-graph scheduler over a fixed set of worker threads.
//!
//! [`ThreadPool::host`] spawns `worker_count - 1` threads, enqueues the first
//! job and runs the worker loop on the calling thread too. It returns once
//! [`ThreadPool::quit`] has been called and every worker has drained the
//! queue.
//!
//! # Design
//!
//! - **Two lock tiers**: one monitor guards the queue and the quit flag;
//!   every job has its own monitor. Workers never hold the queue lock while
//!   touching a job, and the only nesting is job-then-queue when a job is
//!   pushed.
//! - **Batched drain**: a worker moves up to `batch_size` jobs from the tail
//!   of the queue at a time, so recently queued work runs first. There is no
//!   fairness across the whole queue.
//! - **Cooperative shutdown**: `quit` only sets a flag and wakes idle
//!   workers. Jobs in flight always run to completion, and workers keep
//!   draining until the queue is empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::core::error::{fatal, PoolError, ProtocolViolation};
use crate::core::job::{Job, JobControl, JobKind, JobRef, JobState, RunOutcome};
use crate::monitor::{Monitor, MutexGuard};

/// Jobs taken from the queue per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters reported when [`ThreadPool::host`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Threads that ran the worker loop, the hosting thread included.
    pub worker_count: usize,
    /// Jobs pushed onto the queue.
    pub enqueued: u64,
    /// Jobs whose function ran.
    pub executed: u64,
    /// Queue entries dropped because the job still had pending children.
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct HostCounters {
    enqueued: AtomicU64,
    executed: AtomicU64,
    skipped: AtomicU64,
}

impl HostCounters {
    fn snapshot(&self, worker_count: usize) -> HostStats {
        HostStats {
            worker_count,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct JobQueue {
    jobs: Vec<JobRef>,
    should_quit: bool,
}

/// The shared queue and quit flag of one [`host`](ThreadPool::host) call.
///
/// Jobs reach it through [`JobContext::pool`](crate::core::JobContext).
#[derive(Debug)]
pub struct ThreadPool {
    id: Uuid,
    queue: Monitor<JobQueue>,
    batch_size: usize,
    counters: HostCounters,
}

impl ThreadPool {
    /// Runs the job graph rooted at `first_job` on `worker_count` threads.
    ///
    /// The calling thread is one of the workers; a count of zero is treated
    /// as one. Blocks until some job calls [`quit`](Self::quit) and the queue
    /// is empty.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Spawn` if a worker thread cannot be started. The
    /// workers already running are shut down and `first_job` is left
    /// unqueued.
    pub fn host<K: JobKind>(worker_count: usize, first_job: &Job<K>) -> Result<HostStats, PoolError> {
        let config = RuntimeConfig::new().with_worker_count(worker_count.max(1));
        Self::host_with_config(&config, first_job)
    }

    /// Like [`host`](Self::host), with worker count and batch size taken
    /// from `config`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid,
    /// or `PoolError::Spawn` if a worker thread cannot be started.
    pub fn host_with_config<K: JobKind>(
        config: &RuntimeConfig,
        first_job: &Job<K>,
    ) -> Result<HostStats, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let pool = Self {
            id: Uuid::new_v4(),
            queue: Monitor::new(JobQueue::default()),
            batch_size: config.batch_size,
            counters: HostCounters::default(),
        };
        info!(
            pool = %pool.id,
            worker_count = config.worker_count,
            batch_size = config.batch_size,
            "thread pool hosting"
        );

        thread::scope(|scope| -> Result<(), PoolError> {
            let pool = &pool;
            for worker_id in 1..config.worker_count {
                let spawned = thread::Builder::new()
                    .name(format!("job-worker-{worker_id}"))
                    .spawn_scoped(scope, move || pool.worker_loop(worker_id));
                if let Err(e) = spawned {
                    pool.quit();
                    return Err(PoolError::Spawn(e));
                }
            }

            pool.add_job(first_job);
            pool.worker_loop(0);
            Ok(())
        })?;

        let remaining = pool.job_count();
        if remaining > 0 {
            fatal(ProtocolViolation::QueueNotDrained { remaining });
        }

        let stats = pool.counters.snapshot(config.worker_count);
        info!(
            pool = %pool.id,
            executed = stats.executed,
            skipped = stats.skipped,
            "thread pool shut down"
        );
        Ok(stats)
    }

    /// Asks every worker to exit once the queue is empty.
    pub fn quit(&self) {
        self.queue.lock().should_quit = true;
        self.queue.notify_all();
        debug!(pool = %self.id, "quit requested");
    }

    /// Whether [`quit`](Self::quit) has been called.
    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.queue.lock().should_quit
    }

    /// Number of jobs currently in the queue.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.queue.lock().jobs.len()
    }

    /// Publishes `job` to the workers.
    ///
    /// The job must be in the `Created` state; queueing it a second time is
    /// a fatal [`ProtocolViolation::QueuedTwice`]. A job that still has
    /// pending children is dropped from the queue when a worker reaches it
    /// and queued again when its last child finishes.
    pub fn add_job<K: JobKind>(&self, job: &Job<K>) {
        let mut guard = job.lock();
        self.enqueue(job.erase(), guard.control_mut());
    }

    /// Blocks until `job` has run, then frees it.
    ///
    /// A job with no pending children that has not been queued yet is
    /// queued here, since nothing else would queue it. A job that can become
    /// runnable before this call locks it, for instance because its children
    /// are already published, must be marked with [`JobGuard::mark_waited`]
    /// first so the worker that runs it leaves it allocated. The calling
    /// thread must not be the only worker able to run `job`.
    ///
    /// [`JobGuard::mark_waited`]: crate::core::job::JobGuard::mark_waited
    pub fn wait<K: JobKind>(&self, job: &Job<K>) {
        let mut guard = job.lock();
        if !job.is_allocated() {
            fatal(ProtocolViolation::UseAfterFree(job.id()));
        }
        let control = guard.control_mut();
        if control.waiter {
            fatal(ProtocolViolation::AlreadyWaited {
                id: job.id(),
                state: control.state,
            });
        }
        control.waited = true;
        control.waiter = true;
        if control.pending == 0 && control.state == JobState::Created {
            self.enqueue(job.erase(), control);
        }

        trace!(pool = %self.id, job = %job.id(), "waiting on job");
        guard.wait_until_finished();
        guard.free();
    }

    /// Moves a `Created` job to the queue. Caller holds the job's monitor.
    fn enqueue(&self, job: JobRef, control: &mut JobControl) {
        if !job.is_allocated() {
            fatal(ProtocolViolation::UseAfterFree(job.id()));
        }
        if control.state != JobState::Created {
            fatal(ProtocolViolation::QueuedTwice {
                id: job.id(),
                state: control.state,
            });
        }
        control.state = JobState::Queued;
        self.push(job);
    }

    fn push(&self, job: JobRef) {
        trace!(pool = %self.id, job = %job.id(), "job queued");
        self.queue.lock().jobs.push(job);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue.notify_one();
    }

    /// Retires one dependency of `parent`, queueing it when none remain.
    fn child_finished(&self, parent: &JobRef) {
        let mut guard = parent.lock();
        if !parent.is_allocated() {
            fatal(ProtocolViolation::UseAfterFree(parent.id()));
        }
        let pending = guard.control.pending;
        match pending {
            0 => fatal(ProtocolViolation::ParentWithoutDependencies(parent.id())),
            1 => {
                guard.control.pending = 0;
                // A parent whose stale entry is still queued runs from it.
                if guard.control.state == JobState::Created {
                    guard.control.state = JobState::Queued;
                    self.push(parent.clone());
                }
            }
            _ => guard.control.pending -= 1,
        }
    }

    fn worker_loop(&self, worker_id: usize) {
        debug!(pool = %self.id, worker_id, "worker started");
        let _quit_on_panic = QuitOnPanic(self);

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut queue = self.queue.lock();
        loop {
            while !queue.jobs.is_empty() {
                let take = queue.jobs.len().min(self.batch_size);
                let split = queue.jobs.len() - take;
                batch.extend(queue.jobs.drain(split..));
                let should_quit = queue.should_quit;

                MutexGuard::unlocked(&mut queue, || self.run_batch(&mut batch, should_quit));
            }

            if queue.should_quit {
                break;
            }
            self.queue.wait(&mut queue);
        }
        drop(queue);

        debug!(pool = %self.id, worker_id, "worker exiting");
    }

    fn run_batch(&self, batch: &mut Vec<JobRef>, should_quit: bool) {
        for job in batch.drain(..) {
            match job.run(self, should_quit) {
                RunOutcome::Completed { parent } => {
                    self.counters.executed.fetch_add(1, Ordering::Relaxed);
                    if let Some(parent) = parent {
                        self.child_finished(&parent);
                    }
                }
                RunOutcome::Skipped => {
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Shuts the other workers down if this one unwinds out of a job, so the
/// host's scope can join them.
struct QuitOnPanic<'a>(&'a ThreadPool);

impl Drop for QuitOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.quit();
        }
    }
}
