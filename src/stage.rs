//! The capability contract pipeline stages present to the core.
//!
//! Pipeline orchestration (sources, transforms, sinks, and their wiring)
//! lives outside this crate; the only thing the core requires of a stage is
//! that it can report readiness and perform bounded units of work. Drivers
//! poll [`ready`](Stage::ready) and invoke [`work`](Stage::work) — typically
//! from [`WorkerPool`](crate::WorkerPool) tasks — until a stage reports no
//! progress.

/// A pipeline stage that can be polled for work.
pub trait Stage {
    /// Whether input is available for this stage to process right now.
    fn ready(&self) -> bool;

    /// Perform one bounded unit of work. Returns whether any work was done;
    /// `false` means the driver should look elsewhere before polling again.
    fn work(&mut self) -> bool;
}
