//! # gantry — lock-free building blocks for staged data pipelines
//!
//! This crate is the concurrency core of a data-pipeline runtime: three
//! tightly-coupled subsystems that carry the memory-reclamation protocol,
//! the cache-line discipline, and the lifetime invariants for
//! multi-producer/multi-consumer pipelines. Pipeline orchestration layers
//! on top and lives elsewhere.
//!
//! ## Overview
//!
//! - **[`hazard`]** — hazard-pointer reclamation: a process-wide slot
//!   registry, per-thread retire lists, and the scan that frees what no
//!   thread publishes
//! - **[`queue`]** — [`Queue`]: an unbounded Michael–Scott MPMC FIFO using
//!   hazard pointers for node reclamation
//! - **[`pool`]** — [`ObjectPool`]: a batched slab allocator with an atomic
//!   bump cursor, asynchronous prefetch of the next slab, and free-cell
//!   recycling through the queue
//! - **[`workers`]** — [`WorkerPool`]: a fixed-size set of threads executing
//!   heterogeneous, type-erased work items pulled from the queue
//! - **[`stage`]** — [`Stage`]: the `{ready, work}` contract pipeline stages
//!   present to the core
//!
//! The leaves compose bottom-up: hazard → queue → {pool, workers}.
//!
//! ## Quick Start
//!
//! ```
//! use gantry::{ObjectPool, Queue, WorkerPool};
//! use std::sync::Arc;
//!
//! let queue = Arc::new(Queue::new());
//! let pool: Arc<ObjectPool<u64>> = Arc::new(ObjectPool::new());
//! let workers = WorkerPool::new(4);
//! workers.start();
//!
//! for i in 0..16 {
//!     let queue = Arc::clone(&queue);
//!     let pool = Arc::clone(&pool);
//!     workers.submit(move || {
//!         let cell = pool.alloc_with(i);
//!         queue.enqueue(cell as usize);
//!     });
//! }
//!
//! let mut produced = Vec::new();
//! while produced.len() < 16 {
//!     if let Some(addr) = queue.dequeue() {
//!         produced.push(addr);
//!     }
//! }
//! workers.stop(true);
//! ```
//!
//! ## Concurrency model
//!
//! Parallel OS threads sharing memory through atomics; no locks on the hot
//! path, no async runtime, no green threads. The queue is linearizable
//! FIFO; `dequeue` returns `None` rather than blocking. The pool's swap
//! path blocks on its prefetch by design; workers park only in the OS
//! scheduler between iterations.

pub mod hazard;
pub mod pool;
pub mod queue;
pub mod stage;
pub mod workers;

pub use pool::{ObjectPool, SLAB_SIZE};
pub use queue::Queue;
pub use stage::Stage;
pub use workers::{WorkItem, WorkerPool};
