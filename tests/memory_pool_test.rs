//! Integration tests for SlotPool
//!
//! These tests validate the allocator from the outside:
//! - Reuse of freed slots with zeroed payloads
//! - Growth across many segments
//! - Concurrent allocation from several threads
//! - Payload-level synchronization through slot monitors
//! - Fatal protocol violations

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use prometheus_job_pool::{PoolConfig, Slot, SlotPool};
use rand::seq::SliceRandom;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn alloc_numbered(pool: &SlotPool<usize>, value: usize) -> Slot<usize> {
    let slot = pool.alloc().unwrap();
    let mut payload = slot.lock();
    assert_eq!(*payload, 0, "slot {} was not zeroed", slot.id());
    *payload = value;
    drop(payload);
    slot
}

fn assert_numbered(slots: &[Slot<usize>], range: std::ops::Range<usize>) {
    for i in range {
        assert_eq!(*slots[i].lock(), i, "slot {} lost its value", slots[i].id());
    }
}

/// Fills `size` slots, frees the middle half, refills it and frees everything.
fn alloc_iteration(pool: &SlotPool<usize>, size: usize) {
    let mut have: Vec<_> = (0..size).map(|i| alloc_numbered(pool, i)).collect();
    assert_numbered(&have, 0..size);

    let half = size / 2;
    let quarter = half / 2;

    for i in quarter..quarter + half {
        let guard = have[i].lock();
        assert_eq!(*guard, i);
        guard.free();
    }
    assert_numbered(&have, 0..quarter);
    assert_numbered(&have, quarter + half..size);

    for i in quarter..quarter + half {
        have[i] = alloc_numbered(pool, i);
    }
    assert_numbered(&have, 0..size);

    for (i, slot) in have.iter().enumerate() {
        let guard = slot.lock();
        assert_eq!(*guard, i);
        guard.free();
    }
    assert_eq!(pool.stats().live, 0);
}

// ============================================================================
// REUSE AND GROWTH
// ============================================================================

#[test]
fn test_alloc_iterations_of_increasing_size() {
    let pool = SlotPool::<usize>::new();

    for size in [512, 1024, 10240, 65536] {
        alloc_iteration(&pool, size);
    }

    let stats = pool.stats();
    assert!(stats.capacity >= 65536);
    assert_eq!(stats.free, stats.capacity);
    pool.destroy();
}

#[test]
fn test_distinct_slots_while_live() {
    let pool = SlotPool::<usize>::new();
    let slots: Vec<_> = (0..3000).map(|i| alloc_numbered(&pool, i)).collect();

    let ids: HashSet<_> = slots.iter().map(Slot::id).collect();
    assert_eq!(ids.len(), slots.len());

    for slot in &slots {
        slot.lock().free();
    }
    pool.destroy();
}

#[test]
fn test_freed_slot_is_reused_and_rezeroed() {
    let pool = SlotPool::<usize>::new();
    let first = alloc_numbered(&pool, 41);
    let id = first.id();
    first.lock().free();

    let second = pool.alloc().unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(*second.lock(), 0);

    second.lock().free();
    pool.destroy();
}

#[test]
fn test_growth_is_monotonic() {
    let pool = SlotPool::<usize>::with_config(&PoolConfig::new().with_initial_segment_len(16)).unwrap();
    let mut rng = rand::rng();

    let mut slots: Vec<_> = (0..500).map(|i| alloc_numbered(&pool, i)).collect();
    let grown = pool.stats();
    assert!(grown.segments > 1);

    for _ in 0..3 {
        slots.shuffle(&mut rng);
        for slot in slots.drain(..) {
            slot.lock().free();
        }
        slots = (0..500).map(|i| alloc_numbered(&pool, i)).collect();

        let stats = pool.stats();
        assert_eq!(stats.segments, grown.segments);
        assert_eq!(stats.capacity, grown.capacity);
    }

    for slot in &slots {
        slot.lock().free();
    }
    pool.destroy();
}

#[test]
fn test_next_segment_len_never_shrinks() {
    let pool = SlotPool::<u8>::with_config(&PoolConfig::new().with_initial_segment_len(4)).unwrap();
    let mut hints = Vec::new();
    let mut slots = Vec::new();

    for _ in 0..100 {
        slots.push(pool.alloc().unwrap());
        hints.push(pool.stats().next_segment_len);
    }
    assert!(hints.windows(2).all(|w| w[0] <= w[1]));

    for slot in &slots {
        slot.lock().free();
    }
    pool.destroy();
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_alloc_and_free() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2000;

    let pool = SlotPool::<usize>::with_config(&PoolConfig::new().with_initial_segment_len(64)).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = pool.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let slots: Vec<_> = (0..PER_THREAD)
                    .map(|i| alloc_numbered(&pool, t * PER_THREAD + i + 1))
                    .collect();
                (t, slots)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    let mut live = Vec::new();
    for handle in handles {
        let (t, slots) = handle.join().unwrap();
        for (i, slot) in slots.into_iter().enumerate() {
            assert!(ids.insert(slot.id()), "slot {} handed out twice", slot.id());
            assert_eq!(*slot.lock(), t * PER_THREAD + i + 1);
            live.push(slot);
        }
    }
    assert_eq!(pool.stats().live, THREADS * PER_THREAD);

    live.shuffle(&mut rand::rng());
    for slot in &live {
        slot.lock().free();
    }
    assert_eq!(pool.stats().live, 0);
    pool.destroy();
}

#[test]
fn test_slot_monitor_signals_waiter() {
    let pool = SlotPool::<bool>::new();
    let slot = pool.alloc().unwrap();
    let signaller = slot.clone();

    let handle = thread::spawn(move || {
        *signaller.lock() = true;
        signaller.signal();
    });

    {
        let mut ready = slot.lock();
        ready.wait_while(|ready| !*ready);
        assert!(*ready);
    }
    handle.join().unwrap();

    slot.lock().free();
    pool.destroy();
}

#[test]
fn test_broadcast_wakes_every_waiter() {
    const WAITERS: usize = 4;

    let pool = SlotPool::<usize>::new();
    let slot = pool.alloc().unwrap();

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let slot = slot.clone();
            thread::spawn(move || {
                let mut generation = slot.lock();
                generation.wait_while(|g| *g == 0);
                *generation
            })
        })
        .collect();

    {
        let mut generation = slot.lock();
        *generation = 1;
        generation.broadcast();
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1);
    }
    slot.lock().free();
    pool.destroy();
}

// ============================================================================
// PROTOCOL VIOLATIONS
// ============================================================================

#[test]
#[should_panic(expected = "double free of slot 0:0")]
fn test_double_free_panics() {
    let pool = SlotPool::<usize>::new();
    let slot = pool.alloc().unwrap();
    let alias = slot.clone();
    slot.lock().free();
    alias.lock().free();
}

#[test]
#[should_panic(expected = "freed nonempty pool: 2 slot(s) still allocated")]
fn test_destroy_nonempty_pool_panics() {
    let pool = SlotPool::<usize>::new();
    let _a = pool.alloc().unwrap();
    let _b = pool.alloc().unwrap();
    pool.destroy();
}

#[test]
#[should_panic(expected = "pool used after it was destroyed")]
fn test_alloc_after_destroy_panics() {
    let pool = SlotPool::<usize>::new();
    let other = pool.clone();
    pool.destroy();
    let _ = other.alloc();
}
