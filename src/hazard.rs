//! Hazard-pointer memory reclamation for lock-free structures.
//!
//! Threads that traverse a lock-free structure publish the address they are
//! about to dereference in a *hazard slot*. A node that has been unlinked is
//! not freed immediately; it is *retired* into a per-thread list, and a later
//! [`HazardDomain::scan`] frees every retired node whose address no thread
//! currently publishes.
//!
//! # Key Types
//!
//! - [`HazardDomain`]: the process-wide registry of hazard slots
//! - [`HazardSlot`]: a single reservation cell, claimed by at most one thread
//! - [`Retired`]: a node removed from a structure but not yet freed
//!
//! # Lifetime discipline
//!
//! Slots are allocated once and pinned for the process lifetime; the slot
//! list is append-only and never reclaimed. A thread's first touch of a queue
//! lazily claims two slots and a retire list; both are handed back when the
//! thread exits, and a terminal scan runs so retired nodes are not stranded.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Scan threshold multiplier: a thread scans its retire list once it holds
/// `RETIRE_SCALE` entries per slot in the domain. Must be at least 2 so that
/// scans amortize against the number of hazards they must snapshot.
pub const RETIRE_SCALE: usize = 2;

/// A single hazard reservation cell.
///
/// The payload is the address the owning thread is about to dereference;
/// null means the thread is not currently inside a hazardous section.
pub struct HazardSlot {
    /// Published hazard; writes are publication points.
    payload: AtomicPtr<()>,
    /// Claimed by some thread. Freshly constructed slots are born claimed.
    active: AtomicBool,
    /// Forward link in the append-only slot list.
    next: AtomicPtr<HazardSlot>,
}

impl HazardSlot {
    fn new() -> Self {
        Self {
            payload: AtomicPtr::new(ptr::null_mut()),
            active: AtomicBool::new(true),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Publish `ptr` as the owning thread's current hazard.
    ///
    /// The store is sequentially consistent so that it becomes visible to
    /// scanners before the caller's validation re-read of the shared pointer
    /// it protects.
    pub fn protect<T>(&self, ptr: *mut T) {
        self.payload.store(ptr.cast(), Ordering::SeqCst);
    }

    /// Clear the published hazard without giving up the slot.
    pub fn clear(&self) {
        self.payload.store(ptr::null_mut(), Ordering::SeqCst);
    }

    /// Hand the slot back to the domain.
    ///
    /// The payload must read as null before the slot is publicly reusable,
    /// hence the store order here.
    fn release(&self) {
        self.payload.store(ptr::null_mut(), Ordering::SeqCst);
        self.active.store(false, Ordering::Release);
    }
}

/// A node logically removed from a structure but not yet freed.
///
/// Carries a type-erased deallocation function so that a single per-thread
/// retire list can serve every queue instantiation in the process.
pub struct Retired {
    ptr: *mut (),
    dealloc: unsafe fn(*mut ()),
}

impl Retired {
    /// Wrap a retired node.
    ///
    /// # Safety
    ///
    /// `ptr` must be exclusively owned by the retire protocol: unlinked from
    /// its structure, reachable by no new thread, and `dealloc` must be safe
    /// to call on it once no hazard publishes its address.
    pub unsafe fn new<T>(ptr: *mut T, dealloc: unsafe fn(*mut ())) -> Self {
        Self { ptr: ptr.cast(), dealloc }
    }
}

// SAFETY: a retired pointer is owned by exactly one retire list at a time;
// the list hands it to `scan`, which frees it on a single thread.
unsafe impl Send for Retired {}

/// Process-wide registry of hazard slots.
///
/// All producers and consumers of every queue share one domain; see
/// [`domain`].
pub struct HazardDomain {
    head: AtomicPtr<HazardSlot>,
    len: AtomicUsize,
    /// Retired nodes stranded by exited threads because another thread still
    /// published them; drained by every later scan.
    orphans: Mutex<Vec<Retired>>,
}

static DOMAIN: HazardDomain = HazardDomain::new();

/// The process-wide hazard domain.
#[must_use]
pub fn domain() -> &'static HazardDomain {
    &DOMAIN
}

impl HazardDomain {
    const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
            orphans: Mutex::new(Vec::new()),
        }
    }

    /// Claim a slot for the calling thread.
    ///
    /// Scans the list for the first released slot and wins it by CAS; if none
    /// is available, appends a fresh slot (born claimed) at the head.
    pub fn acquire(&'static self) -> &'static HazardSlot {
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: slots are never deallocated, so any pointer read from
            // the list stays valid for the process lifetime.
            let slot = unsafe { &*cur };
            if !slot.active.load(Ordering::Acquire)
                && slot
                    .active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return slot;
            }
            cur = slot.next.load(Ordering::Acquire);
        }

        self.len.fetch_add(1, Ordering::AcqRel);
        let slot: &'static HazardSlot = Box::leak(Box::new(HazardSlot::new()));
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            slot.next.store(head, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                ptr::from_ref(slot).cast_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return slot,
                Err(observed) => head = observed,
            }
        }
    }

    /// Release a claimed slot back to the domain.
    pub fn release(&self, slot: &HazardSlot) {
        slot.release();
    }

    /// Number of slots ever created in the domain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the domain has no slots yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reclamation pass: free every entry of `retired` that no slot currently
    /// publishes, keeping the rest.
    ///
    /// Walking the list once with ordered payload reads yields a consistent
    /// snapshot: a thread that publishes a hazard after the snapshot has, by
    /// protocol, not yet dereferenced the address it protects and will fail
    /// its validation re-read.
    pub fn scan(&self, retired: &mut Vec<Retired>) {
        let mut published = HashSet::new();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: slots are never deallocated.
            let slot = unsafe { &*cur };
            let payload = slot.payload.load(Ordering::SeqCst);
            if !payload.is_null() {
                published.insert(payload as usize);
            }
            cur = slot.next.load(Ordering::Acquire);
        }

        Self::reclaim(&published, retired);

        // Anything stranded by exited threads is reclaimed against the same
        // snapshot; survivors stay stranded for the next scan.
        Self::reclaim(&published, &mut self.orphans.lock());
    }

    fn reclaim(published: &HashSet<usize>, retired: &mut Vec<Retired>) {
        let mut i = 0;
        while i < retired.len() {
            if published.contains(&(retired[i].ptr as usize)) {
                i += 1;
            } else {
                // Swap-with-last keeps removal O(1); order is irrelevant here.
                let entry = retired.swap_remove(i);
                // SAFETY: no slot publishes this address, so no thread holds a
                // reference derived from a validated hazard.
                unsafe { (entry.dealloc)(entry.ptr) };
            }
        }
    }

    fn strand(&self, retired: &mut Vec<Retired>) {
        self.orphans.lock().append(retired);
    }
}

/// Per-thread hazard state: the two slots the queue algorithms use plus the
/// retire list.
pub(crate) struct ThreadHazards {
    pub(crate) hp_a: &'static HazardSlot,
    pub(crate) hp_b: &'static HazardSlot,
    retired: Vec<Retired>,
}

impl ThreadHazards {
    fn new() -> Self {
        let domain = domain();
        Self { hp_a: domain.acquire(), hp_b: domain.acquire(), retired: Vec::new() }
    }

    /// Queue a node for reclamation, scanning once the list is long enough
    /// to amortize the snapshot.
    pub(crate) fn retire(&mut self, entry: Retired) {
        self.retired.push(entry);
        if self.retired.len() >= RETIRE_SCALE * domain().len() {
            domain().scan(&mut self.retired);
        }
    }
}

impl Drop for ThreadHazards {
    fn drop(&mut self) {
        let domain = domain();
        domain.release(self.hp_a);
        domain.release(self.hp_b);
        domain.scan(&mut self.retired);
        if !self.retired.is_empty() {
            // Still published by other threads; a later scan finishes the job.
            domain.strand(&mut self.retired);
        }
    }
}

thread_local! {
    static THREAD_HAZARDS: RefCell<ThreadHazards> = RefCell::new(ThreadHazards::new());
}

/// Run `f` with the calling thread's hazard state, initializing it on first
/// touch.
pub(crate) fn with_thread_hazards<R>(f: impl FnOnce(&mut ThreadHazards) -> R) -> R {
    THREAD_HAZARDS.with(|cell| f(&mut cell.borrow_mut()))
}
