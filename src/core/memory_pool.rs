//! Segmented, thread-safe slab allocator whose slots each carry a monitor.
//!
//! A [`SlotPool<T>`] hands out [`Slot<T>`] handles. Every slot owns a lock
//! and a condition variable ([`Monitor`](crate::Monitor)), so code holding a
//! slot can synchronize on that one object without touching the pool.
//!
//! # Lock tiers
//!
//! - **Pool tier**: one mutex protects the segment list, every segment's
//!   free-list and the growth hint.
//! - **Object tier**: each slot's monitor protects its payload and its
//!   allocation flag.
//!
//! `alloc` locks a slot's monitor while holding the pool lock, and `free`
//! takes the pool lock while holding the freed slot's monitor. These never
//! deadlock: `alloc` only locks slots popped from a free-list, and `free`
//! pushes its slot there only after it no longer needs the pool lock.
//!
//! # Allocation hand-off
//!
//! `alloc` zeroes the payload (resets it to `T::default()`) under the slot's
//! monitor and returns the *only* handle to it. Nobody else can reach the slot
//! until the caller publishes that handle, so the slot is effectively held by
//! the caller until then. Releasing memory requires a [`SlotGuard`]:
//! [`SlotGuard::free`] consumes the guard, so "free only while holding the
//! slot's lock" is checked by the compiler.
//!
//! # Growth
//!
//! New segments are sized by a hint that starts at [`DEFAULT_SEGMENT_LEN`]
//! and is raised to twice the capacity of any full segment seen while
//! searching for space. The hint never shrinks.
//!
//! # Example
//!
//! ```
//! use prometheus_job_pool::SlotPool;
//!
//! let pool = SlotPool::<u64>::new();
//! let slot = pool.alloc()?;
//! {
//!     let mut value = slot.lock();
//!     assert_eq!(*value, 0);
//!     *value = 7;
//! }
//! slot.lock().free();
//! pool.destroy();
//! # Ok::<(), prometheus_job_pool::PoolError>(())
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::core::error::{fatal, PoolError, ProtocolViolation};
use crate::core::segment::{Segment, SlotBlock, SlotCell};
use crate::monitor::{MappedMutexGuard, MutexGuard};

/// Slot count of the first segment a pool allocates.
pub const DEFAULT_SEGMENT_LEN: usize = 1024;

/// Position of a slot inside its pool. Stable across alloc/free cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    /// Index of the owning segment, in creation order.
    pub segment: usize,
    /// Index of the slot within its segment.
    pub index: usize,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.index)
    }
}

/// Point-in-time view of a pool's segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of segments.
    pub segments: usize,
    /// Total slots across all segments.
    pub capacity: usize,
    /// Slots on a free-list.
    pub free: usize,
    /// Slots currently allocated.
    pub live: usize,
    /// Size the next segment will be created with.
    pub next_segment_len: usize,
}

struct PoolState<T> {
    segments: Vec<Segment<T>>,
    next_segment_len: usize,
    destroyed: bool,
}

impl<T: Default> PoolState<T> {
    /// Picks the largest segment with a free slot, raising the growth hint
    /// past every full segment on the way.
    fn choose_free_segment(&mut self) -> Option<usize> {
        let mut chosen: Option<usize> = None;
        let mut suggested = self.next_segment_len;

        for (position, segment) in self.segments.iter().enumerate() {
            if segment.is_full() {
                suggested = suggested.max(segment.capacity().saturating_mul(2));
            } else if chosen.is_none_or(|best| segment.capacity() > self.segments[best].capacity()) {
                chosen = Some(position);
            }
        }

        self.next_segment_len = suggested;
        chosen
    }

    fn add_segment(&mut self, pool: Uuid) -> Result<usize, PoolError> {
        let position = self.segments.len();
        let count = self.next_segment_len;

        self.segments
            .try_reserve(1)
            .map_err(|_| PoolError::ResourceExhausted { slots: count })?;
        self.segments.push(Segment::new(position, count)?);

        debug!(pool = %pool, segment = position, slots = count, "segment added");
        Ok(position)
    }

    fn take_free_slot(&mut self, pool: Uuid) -> Result<(Arc<SlotBlock<T>>, usize), PoolError> {
        let position = match self.choose_free_segment() {
            Some(position) => position,
            None => self.add_segment(pool)?,
        };

        let segment = &mut self.segments[position];
        let Some(index) = segment.pop_free() else {
            unreachable!("segment {position} was chosen without a free slot");
        };
        Ok((Arc::clone(&segment.block), index))
    }
}

impl<T> PoolState<T> {
    fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            segments: self.segments.len(),
            next_segment_len: self.next_segment_len,
            ..PoolStats::default()
        };
        for segment in &self.segments {
            stats.capacity += segment.capacity();
            stats.free += segment.free_len();
            stats.live += segment.live();
        }
        stats
    }
}

struct PoolShared<T> {
    id: Uuid,
    state: Mutex<PoolState<T>>,
}

impl<T> Drop for PoolShared<T> {
    fn drop(&mut self) {
        let stats = self.state.get_mut().stats();
        if stats.live > 0 {
            warn!(pool = %self.id, live = stats.live, "pool dropped with live slots");
        }
    }
}

/// A growable pool of fixed-layout, monitor-bearing slots.
///
/// Cloning a `SlotPool` yields another handle to the same pool.
pub struct SlotPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for SlotPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for SlotPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("id", &self.shared.id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Default + Send + 'static> Default for SlotPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotPool<T> {
    /// Identifier used in log fields.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Current segment and slot counts.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats()
    }

    /// Returns `true` if both handles refer to the same pool.
    #[must_use]
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Default + Send + 'static> SlotPool<T> {
    /// Creates an empty pool whose first segment holds [`DEFAULT_SEGMENT_LEN`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::from_segment_len(DEFAULT_SEGMENT_LEN)
    }

    /// Creates an empty pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn with_config(config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        Ok(Self::from_segment_len(config.initial_segment_len))
    }

    fn from_segment_len(initial_segment_len: usize) -> Self {
        let id = Uuid::new_v4();
        debug!(pool = %id, initial_segment_len, "slot pool created");
        Self {
            shared: Arc::new(PoolShared {
                id,
                state: Mutex::new(PoolState {
                    segments: Vec::new(),
                    next_segment_len: initial_segment_len,
                    destroyed: false,
                }),
            }),
        }
    }

    /// Allocates a zeroed slot.
    ///
    /// Reuses a free slot from the largest segment that has one, otherwise
    /// grows the pool by one segment. The returned handle is the only
    /// reference to the slot.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ResourceExhausted` if a new segment is needed and
    /// its memory cannot be reserved.
    pub fn alloc(&self) -> Result<Slot<T>, PoolError> {
        let mut state = self.shared.state.lock();
        if state.destroyed {
            fatal(ProtocolViolation::PoolDestroyed);
        }

        let (block, index) = state.take_free_slot(self.shared.id)?;
        let cell = block.cell(index);
        let generation = {
            let mut payload = cell.monitor.lock();
            if cell.mark_allocated() {
                fatal(ProtocolViolation::AllocatedSlotReissued(block.slot_id(index)));
            }
            *payload = T::default();
            cell.generation()
        };
        drop(state);

        trace!(pool = %self.shared.id, slot = %block.slot_id(index), "slot allocated");
        Ok(Slot {
            pool: Arc::clone(&self.shared),
            block,
            index,
            generation,
        })
    }

    /// Tears the pool down, releasing every segment.
    ///
    /// Every slot must have been freed first; a pool that still has live
    /// slots is a fatal [`ProtocolViolation::NonEmptyPool`].
    pub fn destroy(self) {
        let mut state = self.shared.state.lock();
        let live: usize = state.segments.iter().map(Segment::live).sum();
        if live > 0 {
            fatal(ProtocolViolation::NonEmptyPool { live });
        }

        let segments = std::mem::take(&mut state.segments);
        state.destroyed = true;
        drop(state);

        debug!(pool = %self.shared.id, segments = segments.len(), "slot pool destroyed");
    }
}

/// Handle to one slot of a [`SlotPool`].
///
/// Cloning a handle does not allocate; both handles refer to the same slot.
/// A handle stays tied to the allocation it came from: once that slot is
/// freed the handle is stale, even if the slot is handed out again.
pub struct Slot<T> {
    pool: Arc<PoolShared<T>>,
    block: Arc<SlotBlock<T>>,
    index: usize,
    generation: u64,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            block: Arc::clone(&self.block),
            index: self.index,
            generation: self.generation,
        }
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("pool", &self.pool.id)
            .field("id", &self.id())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

impl<T> Slot<T> {
    fn cell(&self) -> &SlotCell<T> {
        self.block.cell(self.index)
    }

    /// Position of this slot in its pool.
    #[must_use]
    pub fn id(&self) -> SlotId {
        self.block.slot_id(self.index)
    }

    /// Whether the allocation this handle came from is still live.
    ///
    /// `false` once the slot has been freed, including when it has since
    /// been reallocated through another handle.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        let cell = self.cell();
        cell.is_allocated() && cell.generation() == self.generation
    }

    /// Returns `true` if both handles refer to the same slot.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block) && self.index == other.index
    }

    /// Address of the slot's cell, usable as an identity across payload types.
    pub(crate) fn addr(&self) -> *const () {
        std::ptr::from_ref(self.cell()).cast()
    }

    /// The pool this slot belongs to.
    #[must_use]
    pub fn pool(&self) -> SlotPool<T> {
        SlotPool {
            shared: Arc::clone(&self.pool),
        }
    }

    /// Acquires the slot's monitor.
    pub fn lock(&self) -> SlotGuard<'_, T> {
        SlotGuard {
            slot: self,
            guard: self.cell().monitor.lock(),
        }
    }

    /// Wakes one thread waiting on this slot.
    pub fn signal(&self) -> bool {
        self.cell().monitor.notify_one()
    }

    /// Wakes every thread waiting on this slot.
    pub fn broadcast(&self) -> usize {
        self.cell().monitor.notify_all()
    }
}

impl<T: Default + Send + 'static> Slot<T> {
    /// Allocates another slot from the pool this one came from.
    ///
    /// # Errors
    ///
    /// Same as [`SlotPool::alloc`].
    pub fn alloc_from_peer(&self) -> Result<Self, PoolError> {
        self.pool().alloc()
    }
}

/// A held slot monitor. Dereferences to the payload.
pub struct SlotGuard<'a, T> {
    slot: &'a Slot<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for SlotGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SlotGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> SlotGuard<'a, T> {
    /// The slot this guard holds.
    #[must_use]
    pub const fn slot(&self) -> &'a Slot<T> {
        self.slot
    }

    /// Releases the monitor and blocks until signalled, then re-acquires it.
    ///
    /// The slot must be allocated.
    pub fn wait(&mut self) {
        debug_assert!(self.slot.is_allocated(), "wait on a free slot");
        self.slot.cell().monitor.wait(&mut self.guard);
    }

    /// Blocks while `condition` holds for the payload.
    pub fn wait_while<F>(&mut self, condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        debug_assert!(self.slot.is_allocated(), "wait on a free slot");
        self.slot.cell().monitor.wait_while(&mut self.guard, condition);
    }

    /// Wakes one thread waiting on this slot.
    pub fn signal(&self) -> bool {
        self.slot.signal()
    }

    /// Wakes every thread waiting on this slot.
    pub fn broadcast(&self) -> usize {
        self.slot.broadcast()
    }

    /// Narrows the guard to one part of the payload.
    pub(crate) fn map<U, F>(self, f: F) -> MappedMutexGuard<'a, U>
    where
        F: FnOnce(&mut T) -> &mut U,
    {
        MutexGuard::map(self.guard, f)
    }
}

impl<T: Default> SlotGuard<'_, T> {
    /// Returns the slot to its segment's free-list and releases the monitor.
    ///
    /// The payload is reset on the way out so anything it owns is dropped
    /// now rather than at the next allocation. Freeing a slot that is not
    /// allocated, or that was reallocated after this handle's allocation
    /// was freed, is a fatal [`ProtocolViolation::DoubleFree`].
    pub fn free(self) {
        let Self { slot, mut guard } = self;
        let id = slot.id();

        if !slot.is_allocated() {
            fatal(ProtocolViolation::DoubleFree(id));
        }
        *guard = T::default();

        let mut state = slot.pool.state.lock();
        let Some(segment) = state
            .segments
            .get_mut(id.segment)
            .filter(|segment| segment.owns(&slot.block))
        else {
            fatal(ProtocolViolation::ForeignSlot(id));
        };
        segment.push_free(slot.index);
        slot.cell().mark_free();
        drop(state);
        drop(guard);

        trace!(pool = %slot.pool.id, slot = %id, "slot freed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_segment_len(len: usize) -> SlotPool<u64> {
        SlotPool::with_config(&PoolConfig::new().with_initial_segment_len(len)).unwrap()
    }

    #[test]
    fn test_new_pool_has_no_segments() {
        let pool = SlotPool::<u64>::new();
        let stats = pool.stats();
        assert_eq!(stats.segments, 0);
        assert_eq!(stats.next_segment_len, DEFAULT_SEGMENT_LEN);
        pool.destroy();
    }

    #[test]
    fn test_alloc_returns_zeroed_payload() {
        let pool = pool_with_segment_len(4);
        let slot = pool.alloc().unwrap();
        assert_eq!(*slot.lock(), 0);
        *slot.lock() = 99;
        slot.lock().free();

        let again = pool.alloc().unwrap();
        assert!(again.same_slot(&slot));
        assert_eq!(*again.lock(), 0);
        again.lock().free();
        pool.destroy();
    }

    #[test]
    fn test_growth_doubles_past_full_segment() {
        let pool = pool_with_segment_len(2);
        let slots: Vec<_> = (0..3).map(|_| pool.alloc().unwrap()).collect();

        // The third alloc found segment 0 full, so segment 1 is twice its size.
        let stats = pool.stats();
        assert_eq!(stats.segments, 2);
        assert_eq!(stats.capacity, 2 + 4);
        assert_eq!(stats.live, 3);
        assert_eq!(stats.next_segment_len, 4);

        for slot in &slots {
            slot.lock().free();
        }
        pool.destroy();
    }

    #[test]
    fn test_prefers_largest_free_segment() {
        let pool = pool_with_segment_len(1);
        let first = pool.alloc().unwrap();
        let second = pool.alloc().unwrap();
        assert_eq!(second.id().segment, 1);

        first.lock().free();
        // Segment 0 (1 slot) is free again, segment 1 (2 slots) has one left.
        let third = pool.alloc().unwrap();
        assert_eq!(third.id().segment, 1);

        for slot in [&second, &third] {
            slot.lock().free();
        }
        pool.destroy();
    }

    #[test]
    fn test_alloc_from_peer_uses_same_pool() {
        let pool = SlotPool::<u32>::new();
        let a = pool.alloc().unwrap();
        let b = a.alloc_from_peer().unwrap();
        assert!(a.pool().same_pool(&pool));
        assert!(!a.same_slot(&b));
        assert_eq!(pool.stats().live, 2);

        a.lock().free();
        b.lock().free();
        pool.destroy();
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let pool = SlotPool::<u8>::new();
        let slot = pool.alloc().unwrap();
        slot.lock().free();
        slot.lock().free();
    }

    #[test]
    fn test_freed_handle_goes_stale() {
        let pool = pool_with_segment_len(1);
        let slot = pool.alloc().unwrap();
        let alias = slot.clone();
        assert!(alias.is_allocated());

        slot.lock().free();
        assert!(!alias.is_allocated());

        let again = pool.alloc().unwrap();
        assert!(again.same_slot(&alias));
        assert!(again.is_allocated());
        assert!(!alias.is_allocated());

        again.lock().free();
        pool.destroy();
    }

    #[test]
    #[should_panic(expected = "double free of slot 0:0")]
    fn test_free_through_stale_handle_is_fatal() {
        let pool = pool_with_segment_len(1);
        let slot = pool.alloc().unwrap();
        let stale = slot.clone();
        slot.lock().free();

        let _reissued = pool.alloc().unwrap();
        stale.lock().free();
    }

    #[test]
    #[should_panic(expected = "freed nonempty pool")]
    fn test_destroy_with_live_slot_is_fatal() {
        let pool = SlotPool::<u8>::new();
        let _slot = pool.alloc().unwrap();
        pool.destroy();
    }

    #[test]
    fn test_slot_id_display() {
        let id = SlotId { segment: 2, index: 17 };
        assert_eq!(id.to_string(), "2:17");
    }
}
