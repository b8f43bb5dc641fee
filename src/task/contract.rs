use crate::exec::controller::ExecCx;
use crate::foundation::ids::TaskId;
use crate::gpu::post::GpuContext;
use crate::task::lifecycle::{TaskLifecycle, TaskState};

/// A unit of schedulable render work.
///
/// This contract is the seam between the scheduler and the rest of the
/// application: per-layer image generation, raster effects, disk-backed
/// caching and export all plug in as `Task` implementations, and the
/// scheduler never inspects their content.
///
/// Tasks are shared as `Arc<dyn Task>`; the scheduler holds a non-owning
/// shared reference while the task is queued or processing, and the producer
/// remains the owner.
///
/// Hook discipline:
/// - [`Task::about_to_process`] fires exactly once, on the control thread,
///   when an executor claims the task.
/// - [`Task::finished_processing`] fires exactly once, on the control thread,
///   when the scheduler observes the task's terminal state. For a canceled
///   task that is the moment the scheduler drops it from its structures; the
///   lifecycle cell stays `Canceled` and never shows `Finished`.
/// - Forward lifecycle transitions are applied by the scheduler through
///   [`Task::lifecycle`]; implementations only drive
///   [`TaskLifecycle::cancel`].
pub trait Task: Send + Sync {
    /// Stable identity, used for logging and diagnostics.
    fn id(&self) -> TaskId;

    /// The shared lifecycle cell recording the task's current state.
    fn lifecycle(&self) -> &TaskLifecycle;

    /// Dependency/ordering readiness check.
    ///
    /// Pure and side-effect free. A task that is not ready is skipped during
    /// queue scans and retried on the next dispatch pass; readiness is
    /// expected to become true via external state changes (typically a
    /// dependency task finishing). There is no retry counter or backoff.
    fn ready_to_process(&self) -> bool {
        true
    }

    /// Whether the task requires the GPU post-processing stage after its CPU
    /// stage completes. Decided once at construction, never re-derived.
    fn needs_gpu_processing(&self) -> bool {
        false
    }

    /// Hook invoked exactly once when an executor claims the task.
    fn about_to_process(&self) {}

    /// Hook invoked exactly once when the scheduler observes the task's
    /// terminal state, finished or canceled.
    fn finished_processing(&self) {}

    /// The work body. Runs on a worker thread owned by one executor; this is
    /// the only place blocking work is allowed. Disk-lane bodies may call
    /// [`ExecCx::yield_primary`] to release the primary disk role mid-flight.
    fn process(&self, cx: &mut ExecCx);

    /// The GPU stage body. Runs on the dedicated GPU context thread, only for
    /// tasks with [`Task::needs_gpu_processing`] set.
    fn gpu_process(&self, _gpu: &mut dyn GpuContext) {}

    /// Convenience passthrough for the current lifecycle state.
    fn state(&self) -> TaskState {
        self.lifecycle().state()
    }
}
