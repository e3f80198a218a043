//! Object-pool address discipline through the public surface.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use gantry::{ObjectPool, SLAB_SIZE};

#[test]
fn test_free_then_alloc_from_quiescent_pool_reuses_address() {
    let pool: ObjectPool<u64> = ObjectPool::new();
    let first = pool.alloc();
    unsafe { pool.free(first) };
    let second = pool.alloc();
    assert_eq!(first, second);
}

#[test]
fn test_live_addresses_are_pairwise_distinct_across_threads() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 1_500;

    let pool = Arc::new(ObjectPool::<u64>::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                (0..PER_THREAD).map(|_| pool.alloc() as usize).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut live = HashSet::new();
    for handle in handles {
        for addr in handle.join().unwrap() {
            assert!(live.insert(addr), "address {addr:#x} handed out twice");
        }
    }
    assert_eq!(live.len(), THREADS * PER_THREAD);
    // Enough cells crossed slab boundaries to cover at least one swap.
    assert!(THREADS * PER_THREAD > SLAB_SIZE);
    assert!(pool.slab_count() >= 2);
}

/// Each thread writes its own tag through the pool and must read it back
/// intact before freeing: recycled cells never alias live ones.
#[test]
fn test_alloc_free_cycles_preserve_values() {
    const THREADS: u64 = 8;
    const ROUNDS: u64 = 2_000;

    let pool = Arc::new(ObjectPool::<u64>::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|tag| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let cell = pool.alloc_with(tag << 32 | round);
                    // SAFETY: the cell is exclusively ours until freed.
                    unsafe {
                        assert_eq!(*cell, tag << 32 | round);
                        pool.free(cell);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_clean_preserves_externally_managed_state() {
    let pool: ObjectPool<Vec<u8>> = ObjectPool::new();
    let cell = pool.alloc_with(vec![1, 2, 3]);
    unsafe {
        pool.clean(cell);
        let again = pool.alloc();
        assert_eq!(again, cell);
        assert_eq!(*again, vec![1, 2, 3]);
        pool.free(again);
    }
}
