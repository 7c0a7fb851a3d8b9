//! Monitor implementation.
//!
//! A monitor pairs a mutual exclusion lock with a condition variable tied to
//! that lock. Every slot handed out by a [`SlotPool`](crate::core::SlotPool)
//! carries one, and the thread pool guards its shared queue with another.
//!
//! Both halves come from the `parking_lot` crate:
//!
//! - No poisoning on panic
//! - Compact memory footprint (one word for the lock, one for the condvar)
//! - Condition variables can be used with any mutex guard of the monitor
//!
//! # Examples
//!
//! ```
//! use prometheus_job_pool::Monitor;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let monitor = Arc::new(Monitor::new(false));
//! let signaller = Arc::clone(&monitor);
//!
//! thread::spawn(move || {
//!     *signaller.lock() = true;
//!     signaller.notify_one();
//! });
//!
//! let mut ready = monitor.lock();
//! monitor.wait_while(&mut ready, |ready| !*ready);
//! assert!(*ready);
//! ```

pub use parking_lot::{MappedMutexGuard, MutexGuard};

use parking_lot::{Condvar, Mutex};

/// A lock and the condition variable tied to it.
#[derive(Debug, Default)]
pub struct Monitor<T> {
    lock: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    /// Creates a new, unlocked monitor guarding `value`.
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            lock: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    /// Acquires the monitor's lock, blocking until it is available.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.lock()
    }

    /// Attempts to acquire the lock without blocking.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.lock.try_lock()
    }

    /// Returns `true` if some thread currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Atomically releases the lock held by `guard` and blocks until notified.
    ///
    /// The lock is re-acquired before this returns. Spurious wakeups are
    /// possible; callers re-check their condition in a loop or use
    /// [`wait_while`](Self::wait_while).
    #[inline]
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.cond.wait(guard);
    }

    /// Blocks while `condition` returns `true` for the guarded value.
    #[inline]
    pub fn wait_while<F>(&self, guard: &mut MutexGuard<'_, T>, condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.cond.wait_while(guard, condition);
    }

    /// Wakes up one thread blocked in [`wait`](Self::wait).
    ///
    /// Returns whether a thread was woken up.
    #[inline]
    pub fn notify_one(&self) -> bool {
        self.cond.notify_one()
    }

    /// Wakes up every thread blocked in [`wait`](Self::wait).
    ///
    /// Returns the number of threads woken up.
    #[inline]
    pub fn notify_all(&self) -> usize {
        self.cond.notify_all()
    }

    /// Consumes the monitor, returning the guarded value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.lock.into_inner()
    }

    /// Mutable access without locking; the borrow checker proves exclusivity.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.lock.get_mut()
    }
}
