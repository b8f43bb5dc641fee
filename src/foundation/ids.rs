/// Stable identity of a task, assigned by the producer that owns it.
///
/// Only used for logging and diagnostics; the scheduler never interprets it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct TaskId(pub u64);

/// Identity of an executor within a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecId(pub u32);
