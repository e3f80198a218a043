//! Fixed-size worker pool executing type-erased work items.
//!
//! Workers pull [`WorkItem`]s from a shared lock-free [`Queue`] and invoke
//! them. The pool is deliberately minimal: no priorities, no work stealing,
//! no cancellation of in-flight tasks. Lifecycle is `init → started →
//! stopped`, each transition one-shot; [`stop`](WorkerPool::stop) can
//! optionally drain the queue cooperatively before shutting down.
//!
//! # Example
//!
//! ```
//! use gantry::WorkerPool;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let pool = WorkerPool::new(4);
//! pool.start();
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//! for _ in 0..100 {
//!     let counter = Arc::clone(&counter);
//!     assert!(pool.submit(move || counter.fetch_add(1, Ordering::AcqRel)));
//! }
//!
//! while counter.load(Ordering::Acquire) < 100 {
//!     std::thread::yield_now();
//! }
//! pool.stop(true);
//! assert_eq!(counter.load(Ordering::Acquire), 100);
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::queue::Queue;

/// A unit of work: move-only, callable once, nothing visible in or out.
///
/// Callers that need a result embed their own channel in the closure.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// State shared between the pool handle and its workers. The stop flag and
/// the queue sit on separate cache lines so shutdown polling does not
/// contend with task traffic.
struct Shared {
    stopped: CachePadded<AtomicBool>,
    tasks: Queue<WorkItem>,
}

/// Fixed-size set of threads draining a shared task queue.
pub struct WorkerPool {
    size: usize,
    started: CachePadded<AtomicBool>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool that will run `size` worker threads once started.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            started: CachePadded::new(AtomicBool::new(false)),
            shared: Arc::new(Shared {
                stopped: CachePadded::new(AtomicBool::new(false)),
                tasks: Queue::new(),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Number of worker threads this pool runs.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Launch the workers. One-shot; later calls are no-ops.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut workers = self.workers.lock();
        for _ in 0..self.size {
            let shared = Arc::clone(&self.shared);
            workers.push(thread::spawn(move || Self::worker_loop(&shared)));
        }
        log::debug!("worker pool started {} threads", self.size);
    }

    fn worker_loop(shared: &Shared) {
        while !shared.stopped.load(Ordering::Acquire) {
            let Some(task) = shared.tasks.dequeue() else {
                thread::yield_now();
                continue;
            };
            if shared.stopped.load(Ordering::Acquire) {
                // Shutdown raced the dequeue; the task is dropped unrun.
                continue;
            }
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                log::error!("worker task panicked; continuing with the next task");
            }
        }
        // Hazard slots are released and a terminal scan runs when this
        // thread's locals drop.
    }

    /// Enqueue a task, discarding its return value at the pool boundary.
    ///
    /// Returns false (and enqueues nothing) if the pool has not been
    /// started.
    pub fn submit<F, R>(&self, task: F) -> bool
    where
        F: FnOnce() -> R + Send + 'static,
    {
        if !self.started.load(Ordering::Acquire) {
            log::warn!("cannot submit work: worker pool not started");
            return false;
        }
        self.shared.tasks.enqueue(Box::new(move || {
            task();
        }));
        true
    }

    /// Shut the pool down and join every worker. One-shot; later calls are
    /// no-ops.
    ///
    /// With `wait_for_drain`, first busy-waits until the task queue reports
    /// empty. This is cooperative: submitters must already have stopped for
    /// the drain to terminate. Without it, tasks still queued are dropped
    /// silently.
    pub fn stop(&self, wait_for_drain: bool) {
        if wait_for_drain {
            while !self.shared.tasks.is_empty() {
                thread::yield_now();
            }
        }
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
        log::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.shared.stopped.load(Ordering::Acquire) {
            self.stop(false);
        }
    }
}
