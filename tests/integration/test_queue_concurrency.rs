//! Queue ordering and conservation properties under single- and
//! multi-threaded use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rand::Rng;

use gantry::Queue;

#[test]
fn test_fifo_small_sequence_then_empty() {
    let queue = Queue::new();
    queue.enqueue(1);
    queue.enqueue(2);
    queue.enqueue(3);
    assert_eq!(queue.dequeue(), Some(1));
    assert_eq!(queue.dequeue(), Some(2));
    assert_eq!(queue.dequeue(), Some(3));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_fifo_order_over_hundred_thousand_elements() {
    let queue = Queue::new();
    for i in 0..100_000u32 {
        queue.enqueue(i);
    }
    for i in 0..100_000u32 {
        assert_eq!(queue.dequeue(), Some(i));
    }
    assert_eq!(queue.dequeue(), None);
    assert!(queue.is_empty());
}

#[test]
fn test_len_settles_after_mixed_operations() {
    let queue = Queue::new();
    for i in 0..1_000 {
        queue.enqueue(i);
    }
    for _ in 0..400 {
        assert!(queue.dequeue().is_some());
    }
    assert_eq!(queue.len(), 600);
}

/// Sixteen producers each enqueue their id ten thousand times; sixteen
/// consumers then drain the queue. The union multiset must hold every id
/// exactly ten thousand times.
#[test]
fn test_concurrent_producers_then_concurrent_consumers() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 10_000;

    let queue = Arc::new(Queue::new());

    let producers: Vec<_> = (0..THREADS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    queue.enqueue(id);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let consumers: Vec<_> = (0..THREADS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut taken = Vec::new();
                while let Some(id) = queue.dequeue() {
                    taken.push(id);
                }
                taken
            })
        })
        .collect();

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for consumer in consumers {
        for id in consumer.join().unwrap() {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    assert_eq!(counts.values().sum::<usize>(), THREADS * PER_THREAD);
    for id in 0..THREADS {
        assert_eq!(counts.get(&id), Some(&PER_THREAD), "id {id} lost or duplicated");
    }
    assert_eq!(queue.dequeue(), None);
}

/// Producers and consumers running simultaneously: no value is lost, none is
/// duplicated, and the quiesced queue is empty.
#[test]
fn test_simultaneous_producers_and_consumers_conserve_values() {
    const PRODUCERS: usize = 8;
    const CONSUMERS: usize = 8;
    const PER_PRODUCER: usize = 5_000;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let queue = Arc::new(Queue::new());
    let consumed = Arc::new(AtomicUsize::new(0));

    let producer_handles: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for seq in 0..PER_PRODUCER {
                    // Unique value: producer id in the high bits.
                    queue.enqueue(id * PER_PRODUCER + seq);
                    if rng.gen_bool(0.001) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let mut taken = Vec::new();
                while consumed.load(Ordering::Acquire) < TOTAL {
                    if let Some(value) = queue.dequeue() {
                        consumed.fetch_add(1, Ordering::AcqRel);
                        taken.push(value);
                    } else {
                        thread::yield_now();
                    }
                }
                taken
            })
        })
        .collect();

    for producer in producer_handles {
        producer.join().unwrap();
    }

    let mut seen = Vec::with_capacity(TOTAL);
    for consumer in consumer_handles {
        seen.extend(consumer.join().unwrap());
    }

    assert_eq!(seen.len(), TOTAL);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), TOTAL, "duplicate values observed");
    assert_eq!(queue.dequeue(), None);
}

/// Heavy churn across many short-lived threads; exercises hazard-slot reuse
/// and terminal scans at thread exit.
#[test]
fn test_queue_survives_thread_churn() {
    let queue = Arc::new(Queue::new());
    for round in 0..8 {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..1_000 {
                        queue.enqueue(round * 10_000 + i * 1_000 + seq);
                    }
                    for _ in 0..1_000 {
                        while queue.dequeue().is_none() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
    assert_eq!(queue.dequeue(), None);
}
