//! Fixed-size blocks of monitor-bearing slots.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::PoolError;
use crate::core::memory_pool::SlotId;
use crate::monitor::Monitor;

/// One slot: an allocation flag plus the payload behind its own monitor.
#[derive(Debug)]
pub(crate) struct SlotCell<T> {
    /// Only flipped while the slot's monitor is held.
    allocated: AtomicBool,
    /// Bumped on every free, so handles from an earlier allocation go stale.
    generation: AtomicU64,
    pub(crate) monitor: Monitor<T>,
}

impl<T> SlotCell<T> {
    pub(crate) fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Acquire)
    }

    /// Marks the slot allocated, returning the previous flag.
    pub(crate) fn mark_allocated(&self) -> bool {
        self.allocated.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn mark_free(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.allocated.store(false, Ordering::Release);
    }
}

/// The contiguous cells of one segment, shared with every handle into it.
#[derive(Debug)]
pub(crate) struct SlotBlock<T> {
    position: usize,
    cells: Box<[SlotCell<T>]>,
}

impl<T> SlotBlock<T> {
    pub(crate) fn cell(&self, index: usize) -> &SlotCell<T> {
        &self.cells[index]
    }

    pub(crate) const fn slot_id(&self, index: usize) -> SlotId {
        SlotId {
            segment: self.position,
            index,
        }
    }
}

/// A block of slots plus the stack of indices not currently handed out.
#[derive(Debug)]
pub(crate) struct Segment<T> {
    pub(crate) block: Arc<SlotBlock<T>>,
    free: Vec<usize>,
}

impl<T: Default> Segment<T> {
    /// Builds a segment of `count` free slots at `position` in its pool.
    pub(crate) fn new(position: usize, count: usize) -> Result<Self, PoolError> {
        let exhausted = |_| PoolError::ResourceExhausted { slots: count };

        let mut cells = Vec::new();
        cells.try_reserve_exact(count).map_err(exhausted)?;
        let mut free = Vec::new();
        free.try_reserve_exact(count).map_err(exhausted)?;

        for index in 0..count {
            cells.push(SlotCell {
                allocated: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                monitor: Monitor::new(T::default()),
            });
            free.push(index);
        }

        Ok(Self {
            block: Arc::new(SlotBlock {
                position,
                cells: cells.into_boxed_slice(),
            }),
            free,
        })
    }
}

impl<T> Segment<T> {
    pub(crate) fn capacity(&self) -> usize {
        self.block.cells.len()
    }

    pub(crate) fn free_len(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn live(&self) -> usize {
        self.capacity() - self.free.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Pops the most recently freed slot (LIFO).
    pub(crate) fn pop_free(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Returns a slot to the free stack. Never reallocates: the stack was
    /// reserved for the whole segment up front.
    pub(crate) fn push_free(&mut self, index: usize) {
        debug_assert!(self.free.len() < self.capacity());
        self.free.push(index);
    }

    pub(crate) fn owns(&self, block: &Arc<SlotBlock<T>>) -> bool {
        Arc::ptr_eq(&self.block, block)
    }
}
