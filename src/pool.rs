//! Thread-safe object pool with slab allocation and asynchronous prefetch.
//!
//! Cells are handed out from a contiguous slab through an atomic bump
//! cursor; a background thread prefetches the next slab so the swap path
//! never pays allocation latency, and freed cells recycle through a
//! lock-free [`Queue`] so the working set stays bounded for long-running
//! pipelines.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   bump CAS    ┌──────────────┐
//! │ current slab  │──────────────>│   alloc()    │
//! └───────────────┘               └──────────────┘
//!         ▲                              ▲
//!         │ swap (elected thread)        │ pop
//! ┌───────────────┐               ┌──────────────┐
//! │ prefetch      │               │ free queue   │<── free() / clean()
//! │ (background)  │               └──────────────┘
//! └───────────────┘
//! ```
//!
//! Slabs are pinned for the pool's lifetime and never moved, so a cell
//! address stays valid until the pool is dropped.

use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::queue::Queue;

/// Number of cells per slab. A power of two, sized so slab swaps are rare on
/// allocation-heavy pipelines.
pub const SLAB_SIZE: usize = 4096;

/// A contiguous batch of `SLAB_SIZE` default-constructed cells.
///
/// Held as a raw pointer plus length so cell addresses can be handed out
/// without a live `&`/`&mut` aliasing them; reconstituted into the boxed
/// slice it came from on drop.
struct Slab<T> {
    cells: *mut T,
    len: usize,
}

impl<T: Default> Slab<T> {
    fn new() -> Self {
        let cells: Box<[T]> = (0..SLAB_SIZE).map(|_| T::default()).collect();
        let len = cells.len();
        Self { cells: Box::into_raw(cells) as *mut T, len }
    }
}

impl<T> Slab<T> {
    fn first(&self) -> *mut T {
        self.cells
    }

    /// Address of the final cell (not one-past-the-end).
    fn last(&self) -> *mut T {
        // SAFETY: `len` is nonzero and in bounds of the original allocation.
        unsafe { self.cells.add(self.len - 1) }
    }
}

impl<T> Drop for Slab<T> {
    fn drop(&mut self) {
        // SAFETY: reconstitutes exactly the boxed slice this slab was built
        // from; every cell holds a live `T` (default or assigned).
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(self.cells, self.len)) });
    }
}

// SAFETY: a slab is an owned allocation; sending it between threads moves
// ownership wholesale.
unsafe impl<T: Send> Send for Slab<T> {}

/// A recycled cell address traveling through the free queue.
struct FreeCell<T>(*mut T);

// SAFETY: the address points into a slab owned by the pool; enqueueing it
// transfers the unique permission to hand the cell out again.
unsafe impl<T: Send> Send for FreeCell<T> {}

/// Batched slab allocator with an async-prefetched next slab and a free-cell
/// recycling queue.
///
/// Addresses returned by [`alloc`](ObjectPool::alloc) always point into a
/// slab owned by the pool; no address is simultaneously in the free queue
/// and handed out as live. The pool grows monotonically until destruction.
///
/// # Example
///
/// ```
/// use gantry::ObjectPool;
///
/// let pool: ObjectPool<u64> = ObjectPool::new();
/// let cell = pool.alloc_with(7);
/// unsafe {
///     assert_eq!(*cell, 7);
///     pool.free(cell);
/// }
/// ```
pub struct ObjectPool<T> {
    /// Every slab the pool has ever owned, in allocation order. Touched only
    /// on the swap path and at teardown.
    slabs: Mutex<Vec<Slab<T>>>,
    /// Next cell to hand out; null while a slab swap is in progress.
    current: CachePadded<AtomicPtr<T>>,
    /// Address of the final cell in the current slab.
    last: AtomicPtr<T>,
    /// Pending prefetch that will yield the next slab.
    incoming: Mutex<Receiver<Slab<T>>>,
    /// Cells returned by `free`/`clean`, reused before the bump path.
    free: Queue<FreeCell<T>>,
}

impl<T: Default + Send + 'static> ObjectPool<T> {
    /// Create a pool with one live slab and the next already prefetching.
    #[must_use]
    pub fn new() -> Self {
        let slab = Slab::new();
        let current = slab.first();
        let last = slab.last();
        Self {
            slabs: Mutex::new(vec![slab]),
            current: CachePadded::new(AtomicPtr::new(current)),
            last: AtomicPtr::new(last),
            incoming: Mutex::new(Self::prefetch()),
            free: Queue::new(),
        }
    }

    /// Launch the background allocation of the next slab.
    ///
    /// One-shot: the spawned thread builds a slab, hands it through the
    /// bounded channel, and exits. The swap path blocks on `recv` if it gets
    /// there first.
    fn prefetch() -> Receiver<Slab<T>> {
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            // Send only fails if the pool was dropped first; the slab is
            // released here in that case.
            let _ = tx.send(Slab::new());
        });
        rx
    }

    /// Hand out a cell, preferring recycled cells over fresh slab space.
    ///
    /// The returned address points at a live `T` in default (or recycled)
    /// state; it stays valid until the pool is dropped. Callers hand it back
    /// through [`free`](ObjectPool::free) or [`clean`](ObjectPool::clean).
    pub fn alloc(&self) -> *mut T {
        loop {
            if self.free.is_empty() {
                if let Some(cell) = self.take_from_slab() {
                    return cell;
                }
            } else if let Some(FreeCell(cell)) = self.free.dequeue() {
                // Another thread may race us to the last free cell; the
                // dequeue result is what counts.
                return cell;
            }
            std::hint::spin_loop();
        }
    }

    /// [`alloc`](ObjectPool::alloc), then overwrite the cell's default state
    /// with `value`.
    pub fn alloc_with(&self, value: T) -> *mut T {
        let cell = self.alloc();
        // SAFETY: `alloc` returned a live cell this thread exclusively holds.
        unsafe { *cell = value };
        cell
    }

    /// Run the destructor of `*cell` and recycle the cell.
    ///
    /// A panicking destructor aborts the process rather than unwinding into
    /// pool internals.
    ///
    /// # Safety
    ///
    /// `cell` must have come from this pool's [`alloc`](ObjectPool::alloc)
    /// and must not have been freed or cleaned since; the caller must hold no
    /// other reference to it.
    pub unsafe fn free(&self, cell: *mut T) {
        let dropped = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: per the caller contract, `cell` holds a live value
            // exclusively owned by the caller.
            unsafe { ptr::drop_in_place(cell) };
        }));
        if dropped.is_err() {
            log::error!("value destructor panicked inside ObjectPool::free; aborting");
            process::abort();
        }
        // SAFETY: the old value is gone; restore the default state every
        // slab cell holds so teardown drops each cell exactly once.
        unsafe { ptr::write(cell, T::default()) };
        self.free.enqueue(FreeCell(cell));
    }

    /// Recycle the cell without running the destructor, for objects that are
    /// externally reset and reused (message builders and the like).
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](ObjectPool::free).
    pub unsafe fn clean(&self, cell: *mut T) {
        self.free.enqueue(FreeCell(cell));
    }

    /// Number of slabs the pool currently owns. Advisory.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.lock().len()
    }

    /// Bump-allocate from the current slab, or `None` if a swap is in flight
    /// and the caller should come back around.
    fn take_from_slab(&self) -> Option<*mut T> {
        loop {
            let cell = self.current.load(Ordering::Acquire);
            if cell.is_null() {
                // Mid-swap; the new slab will be published shortly.
                return None;
            }
            let end = self.last.load(Ordering::Acquire);
            if cell == end {
                // Taking the final cell elects this thread to swap slabs.
                // Publishing null parks every other allocator until the new
                // slab is visible; the elected thread keeps the final cell as
                // its own allocation, so the swap never loses a cell.
                if self
                    .current
                    .compare_exchange(end, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.swap_slab();
                    return Some(end);
                }
            } else if self
                .current
                .compare_exchange_weak(
                    cell,
                    // SAFETY: a successful CAS proves `cell` was the cursor of
                    // the slab ending at `end` with `cell != end`, so the
                    // successor is in bounds; computing it speculatively stays
                    // within one-past-the-end of the slab allocation.
                    unsafe { cell.add(1) },
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Some(cell);
            }
        }
    }

    /// Install the prefetched slab and start the next prefetch. Runs on the
    /// single elected thread while `current` is null.
    fn swap_slab(&self) {
        let slab = {
            let mut incoming = self.incoming.lock();
            // Blocking by design: the prefetch usually finished long ago.
            let slab = incoming.recv().expect("slab prefetch thread disappeared");
            *incoming = Self::prefetch();
            slab
        };

        let first = slab.first();
        let end = slab.last();
        let total = {
            let mut slabs = self.slabs.lock();
            slabs.push(slab);
            slabs.len()
        };
        log::debug!("object pool swapped in slab {total} ({SLAB_SIZE} cells)");

        // `last` must be visible before `current` republishes the bump path.
        self.last.store(end, Ordering::Release);
        self.current.store(first, Ordering::Release);
    }
}

impl<T: Default + Send + 'static> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
