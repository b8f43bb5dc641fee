//! Taskmill is the asynchronous multi-resource task scheduler behind a
//! frame-by-frame composition renderer.
//!
//! Rendering one frame decomposes into many independent units of work
//! (per-layer image generation, raster effects, disk-backed caching, GPU
//! post-processing). Taskmill decides *when and on which resource* each unit
//! executes:
//!
//! - a bounded pool of CPU worker threads,
//! - a serialized disk channel with stall-escape backup executors,
//! - a batched GPU post-processing stage on a dedicated context thread.
//!
//! The API is tick-oriented: producers enqueue work with
//! [`TaskScheduler::schedule_cpu_task`] / [`TaskScheduler::schedule_disk_task`],
//! and the embedding application drives [`TaskScheduler::que_tasks`] and
//! [`TaskScheduler::pump`] from its interactive loop. All scheduler state is
//! owned by the control thread; workers only run task bodies and report back
//! through a completion-event channel.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// Executor worker threads and the per-assignment execution context.
pub mod exec;
/// Batched GPU post-processing stage.
pub mod gpu;
/// Scheduler orchestration.
pub mod sched;
/// Task contract, lifecycle state machine and holding queue.
pub mod task;

pub use crate::foundation::error::{TaskmillError, TaskmillResult};
pub use crate::foundation::ids::{ExecId, TaskId};

pub use crate::exec::controller::{ExecCx, ExecLane};
pub use crate::gpu::post::GpuContext;
pub use crate::sched::scheduler::{SchedulerOpts, SchedulerUsage, TaskScheduler};
pub use crate::task::contract::Task;
pub use crate::task::lifecycle::{TaskLifecycle, TaskState};
pub use crate::task::queue::TaskQueue;
