/// The multi-resource task scheduler.
pub mod scheduler;
