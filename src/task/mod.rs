/// The task contract consumed by the scheduler.
pub mod contract;
/// Lifecycle state machine shared between producers, scheduler and workers.
pub mod lifecycle;
/// Ordered, dependency-aware holding queue for unassigned tasks.
pub mod queue;
