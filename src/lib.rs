//! # Prometheus Job Pool
//!
//! A segmented slab allocator whose slots each carry a monitor, and a
//! dependency-graph job scheduler built on top of it.
//!
//! Fine-grained parallel work (thousands of tiny tasks forming a tree) spends
//! most of its time in the allocator and the queue, not in the tasks. This
//! library keeps both cheap: job memory comes from per-kind slab pools that
//! recycle slots LIFO, and every slot already owns the lock and condition
//! variable needed to synchronize on it.
//!
//! ## Key Features
//!
//! - **Monitor-bearing slots**: every [`Slot`] has its own lock and condvar
//! - **Segmented growth**: pools grow by segments sized at least twice the largest full one
//! - **Typed job kinds**: a [`JobKind`] names the argument type and the function workers run
//! - **Dependency graphs**: a parent becomes runnable once all its children have finished
//! - **Scoped hosting**: [`ThreadPool::host`] runs the graph and returns when it has drained
//!
//! ## SlotPool - Monitor-Bearing Slab Allocator
//!
//! ```rust
//! use prometheus_job_pool::SlotPool;
//!
//! let pool = SlotPool::<String>::new();
//! let slot = pool.alloc()?;
//! slot.lock().push_str("hello");
//! slot.lock().free();
//! pool.destroy();
//! # Ok::<(), prometheus_job_pool::PoolError>(())
//! ```
//!
//! ## ThreadPool - Dependency-Graph Scheduling
//!
//! A root job allocates children, hangs them off a continuation job and
//! publishes them. The continuation is never queued by hand: the last child
//! to finish queues it, and it shuts the pool down.
//!
//! ```rust
//! use prometheus_job_pool::{JobContext, JobKind, JobPool, ThreadPool};
//!
//! struct Leaf;
//!
//! impl JobKind for Leaf {
//!     type Arg = ();
//!
//!     fn run(_cx: JobContext<'_, Self>) {}
//! }
//!
//! #[derive(Default)]
//! struct RootArg {
//!     leaves: Option<JobPool<Leaf>>,
//!     spawned: bool,
//! }
//!
//! struct Root;
//!
//! impl JobKind for Root {
//!     type Arg = RootArg;
//!
//!     fn run(cx: JobContext<'_, Self>) {
//!         if cx.arg.spawned {
//!             cx.pool.quit();
//!             return;
//!         }
//!         cx.arg.spawned = true;
//!
//!         let Some(leaves) = cx.arg.leaves.clone() else { return };
//!         let children: Vec<_> = (0..4).filter_map(|_| leaves.alloc(()).ok()).collect();
//!
//!         // The running job's own monitor is held, so link under a continuation.
//!         let Ok(next) = cx.this.alloc_peer(RootArg { leaves: None, spawned: true }) else { return };
//!         {
//!             let mut parent = next.lock();
//!             for child in &children {
//!                 child.add_parent(&mut parent);
//!             }
//!         }
//!         for child in &children {
//!             cx.pool.add_job(child);
//!         }
//!     }
//! }
//!
//! let leaves = JobPool::<Leaf>::new();
//! let roots = JobPool::<Root>::new();
//! let root = roots.alloc(RootArg { leaves: Some(leaves.clone()), spawned: false })?;
//!
//! let stats = ThreadPool::host(2, &root)?;
//! assert_eq!(stats.executed, 1 + 4 + 1);
//! leaves.destroy();
//! roots.destroy();
//! # Ok::<(), prometheus_job_pool::PoolError>(())
//! ```
//!
//! ## Protocol Violations
//!
//! Misuse of the allocation or dependency protocol (double free, queueing a
//! job twice, destroying a pool with live slots) is a programmer error. It is
//! logged through `tracing` and then panics; see [`ProtocolViolation`].
//!
//! For complete examples, see:
//! - `tests/thread_pool_test.rs` - job graphs under several worker counts
//! - `tests/memory_pool_test.rs` - allocator reuse and growth

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Slot allocation, job graphs and the worker pool that runs them.
pub mod core;
/// Configuration models for slot pools and the thread pool.
pub mod config;
/// Lock and condition variable pairs.
pub mod monitor;
/// Shared utilities.
pub mod util;

pub use crate::config::{PoolConfig, RuntimeConfig};
pub use crate::core::{
    HostStats, Job, JobContext, JobKind, JobPool, JobRef, JobState, ParentGuard, PoolError,
    PoolStats, ProtocolViolation, Slot, SlotGuard, SlotId, SlotPool, ThreadPool,
};
pub use crate::monitor::Monitor;
