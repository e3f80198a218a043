//! Unbounded lock-free multi-producer multi-consumer FIFO queue.
//!
//! This is the Michael–Scott queue ("Simple, Fast, and Practical Non-Blocking
//! and Blocking Concurrent Queue Algorithms") with hazard-pointer reclamation
//! from the [`hazard`](crate::hazard) module. The queue always contains a
//! sentinel node whose value is never read: `head` points at the sentinel and
//! the first real element is `head.next`, while `tail` points at the last
//! node or at a node whose successor is the last node (the lagging-tail
//! discipline; any operation that observes the lag completes the swing).
//!
//! `head` and `tail` live on separate cache lines so producers and consumers
//! do not false-share.
//!
//! # Example
//!
//! ```
//! use gantry::Queue;
//!
//! let queue = Queue::new();
//! queue.enqueue("first");
//! queue.enqueue("second");
//! assert_eq!(queue.dequeue(), Some("first"));
//! assert_eq!(queue.dequeue(), Some("second"));
//! assert_eq!(queue.dequeue(), None);
//! ```

use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::hazard::{self, Retired};

struct Node<T> {
    value: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    /// The dummy node at the front of every queue; its value slot is never
    /// initialized.
    fn sentinel() -> Self {
        Self { value: MaybeUninit::uninit(), next: AtomicPtr::new(ptr::null_mut()) }
    }

    fn new(value: T) -> Self {
        Self { value: MaybeUninit::new(value), next: AtomicPtr::new(ptr::null_mut()) }
    }
}

/// Deallocate a retired node without touching its value slot.
///
/// # Safety
///
/// `ptr` must be a `Box`-allocated `Node<T>` whose value has already been
/// moved out (every retired node is a former sentinel).
unsafe fn dealloc_node<T>(ptr: *mut ()) {
    drop(unsafe { Box::from_raw(ptr.cast::<Node<T>>()) });
}

/// Unbounded MPMC FIFO queue, lock-free on both ends.
///
/// Ownership of enqueued values transfers into the queue on
/// [`enqueue`](Queue::enqueue) and back out on [`dequeue`](Queue::dequeue).
/// [`len`](Queue::len) and [`is_empty`](Queue::is_empty) are advisory under
/// concurrency; `dequeue` returning `None` is the authoritative empty signal.
pub struct Queue<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    len: AtomicUsize,
}

// SAFETY: values move through the queue by ownership transfer; nodes are
// shared across threads only behind the hazard protocol and are freed exactly
// once, by a scan that proved no thread publishes them.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Create an empty queue holding a fresh sentinel.
    #[must_use]
    pub fn new() -> Self {
        let sentinel = Box::into_raw(Box::new(Node::sentinel()));
        Self {
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            len: AtomicUsize::new(0),
        }
    }

    /// Append `value` at the tail, taking ownership of it.
    ///
    /// Allocation failure is fatal; there is no retryable error path on the
    /// hot path.
    pub fn enqueue(&self, value: T) {
        let node = Box::into_raw(Box::new(Node::new(value)));
        hazard::with_thread_hazards(|h| {
            let back = loop {
                let back = self.tail.load(Ordering::Acquire);
                h.hp_a.protect(back);
                if self.tail.load(Ordering::Acquire) != back {
                    continue;
                }
                // SAFETY: `back` is published in hp_a and re-validated as the
                // tail, so no scan frees it while we dereference.
                let next = unsafe { &*back }.next.load(Ordering::Acquire);
                if self.tail.load(Ordering::Acquire) != back {
                    continue;
                }
                if !next.is_null() {
                    // Help a slow enqueuer complete its tail swing.
                    let _ = self.tail.compare_exchange_weak(
                        back,
                        next,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    continue;
                }
                // SAFETY: as above; `back` is still protected.
                if unsafe { &*back }
                    .next
                    .compare_exchange_weak(
                        ptr::null_mut(),
                        node,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break back;
                }
            };
            // Best effort: a helping thread may already have swung the tail.
            let _ = self.tail.compare_exchange(back, node, Ordering::AcqRel, Ordering::Relaxed);
            h.hp_a.clear();
        });
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove and return the value at the head, or `None` if the queue was
    /// observed empty at a consistent linearization point.
    pub fn dequeue(&self) -> Option<T> {
        hazard::with_thread_hazards(|h| loop {
            let front = self.head.load(Ordering::Acquire);
            h.hp_a.protect(front);
            if self.head.load(Ordering::Acquire) != front {
                continue;
            }
            let back = self.tail.load(Ordering::Acquire);
            // SAFETY: `front` is published in hp_a and re-validated as the head.
            let next = unsafe { &*front }.next.load(Ordering::Acquire);
            h.hp_b.protect(next);
            if self.head.load(Ordering::Acquire) != front {
                continue;
            }
            if next.is_null() {
                h.hp_a.clear();
                h.hp_b.clear();
                return None;
            }
            if front == back {
                // The tail lags behind the node we are about to remove.
                let _ = self.tail.compare_exchange_weak(
                    back,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                continue;
            }
            if self
                .head
                .compare_exchange_weak(front, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: winning the head CAS makes this thread the unique
                // consumer of the value in `next` (which becomes the new
                // sentinel, whose value slot is never read again); hp_b keeps
                // the node alive while we move the value out.
                let value = unsafe { (*next).value.assume_init_read() };
                h.hp_a.clear();
                h.hp_b.clear();
                // SAFETY: `front` is unlinked; no new thread can reach it, and
                // its value slot was consumed when it became the sentinel.
                h.retire(unsafe { Retired::new(front, dealloc_node::<T>) });
                self.len.fetch_sub(1, Ordering::AcqRel);
                return Some(value);
            }
        })
    }

    /// Advisory element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Advisory emptiness check; treat [`dequeue`](Queue::dequeue) returning
    /// `None` as the authoritative signal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Exclusive access: walk the chain, dropping live values and freeing
        // every node. The sentinel is freed without touching its value slot.
        let mut cur = *self.head.get_mut();
        let mut is_sentinel = true;
        while !cur.is_null() {
            // SAFETY: every node in the chain was Box-allocated and is
            // reachable exactly once from this walk.
            let mut node = unsafe { Box::from_raw(cur) };
            cur = *node.next.get_mut();
            if !is_sentinel {
                // SAFETY: nodes past the sentinel still own their values.
                unsafe { node.value.assume_init_drop() };
            }
            is_sentinel = false;
        }
    }
}
