use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use crate::foundation::error::{TaskmillError, TaskmillResult};
use crate::foundation::ids::ExecId;
use crate::task::contract::Task;

/// Which resource an executor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecLane {
    /// Pure compute; one of a bounded pool sized to host parallelism.
    Cpu,
    /// I/O bound; serialized onto a single primary executor with stall-escape
    /// backups.
    Disk,
}

impl ExecLane {
    fn label(self) -> &'static str {
        match self {
            ExecLane::Cpu => "cpu",
            ExecLane::Disk => "disk",
        }
    }
}

/// Events delivered from worker and GPU threads to the scheduler's control
/// thread. Delivered exactly once per assignment (or per GPU flush).
pub(crate) enum Event {
    /// An executor finished running a task body.
    TaskFinished {
        task: Arc<dyn Task>,
        exec: ExecId,
        lane: ExecLane,
    },
    /// A disk executor is still busy but yields the primary role.
    DiskPartialProgress { exec: ExecId },
    /// The GPU context thread processed one flushed batch.
    GpuFlushFinished { tasks: Vec<Arc<dyn Task>> },
}

/// Per-assignment context handed to [`Task::process`].
///
/// On the disk lane, [`ExecCx::yield_primary`] emits the stall-escape signal
/// that lets the scheduler promote a backup executor while the current body
/// keeps running. On the CPU lane the context is inert.
pub struct ExecCx {
    exec: ExecId,
    lane: ExecLane,
    events: Sender<Event>,
    yielded: bool,
}

impl ExecCx {
    /// The lane of the executor running this assignment.
    pub fn lane(&self) -> ExecLane {
        self.lane
    }

    /// The identity of the executor running this assignment.
    pub fn exec(&self) -> ExecId {
        self.exec
    }

    /// Signal "still busy, yielding the primary disk role".
    ///
    /// Distinct from completion and from failure: the body keeps running and
    /// a completion event still follows. At most one signal is sent per
    /// assignment; repeat calls and calls on the CPU lane are no-ops.
    pub fn yield_primary(&mut self) {
        if self.lane != ExecLane::Disk || self.yielded {
            return;
        }
        self.yielded = true;
        let _ = self.events.send(Event::DiskPartialProgress { exec: self.exec });
    }
}

/// A long-lived execution context bound to exactly one worker thread.
///
/// The controller itself has no free/busy flag: free membership lives in the
/// scheduler's free-lists, and a task can only be assigned by taking the
/// executor out of a free-list. The executor re-enters the list when its
/// completion event is handled, which makes assigning a busy executor
/// structurally unrepresentable.
pub(crate) struct ExecController {
    id: ExecId,
    assignments: Option<Sender<Arc<dyn Task>>>,
    worker: Option<JoinHandle<()>>,
}

impl ExecController {
    /// Spawn the worker thread for one executor.
    pub(crate) fn spawn(
        id: ExecId,
        lane: ExecLane,
        events: Sender<Event>,
    ) -> TaskmillResult<Self> {
        let (tx, rx) = mpsc::channel::<Arc<dyn Task>>();
        let worker = std::thread::Builder::new()
            .name(format!("taskmill-{}-{}", lane.label(), id.0))
            .spawn(move || worker_loop(id, lane, rx, events))
            .map_err(|e| {
                TaskmillError::init(format!("failed to spawn {} worker: {e}", lane.label()))
            })?;
        Ok(Self {
            id,
            assignments: Some(tx),
            worker: Some(worker),
        })
    }

    pub(crate) fn id(&self) -> ExecId {
        self.id
    }

    /// Hand one task to the worker.
    ///
    /// The caller must have removed this executor from its free-list first
    /// and must not assign again until the completion event for this task has
    /// been handled.
    pub(crate) fn assign(&self, task: Arc<dyn Task>) {
        if let Some(tx) = &self.assignments {
            // Send only fails once the worker exited, which the scheduler
            // never triggers while assignments are still being made.
            let _ = tx.send(task);
        }
    }

    /// Stop accepting tasks and block until the in-flight task, if any, has
    /// exited cleanly.
    pub(crate) fn shutdown(&mut self) {
        self.assignments.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ExecController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    id: ExecId,
    lane: ExecLane,
    assignments: Receiver<Arc<dyn Task>>,
    events: Sender<Event>,
) {
    while let Ok(task) = assignments.recv() {
        let mut cx = ExecCx {
            exec: id,
            lane,
            events: events.clone(),
            yielded: false,
        };
        task.process(&mut cx);
        if events
            .send(Event::TaskFinished { task, exec: id, lane })
            .is_err()
        {
            // Scheduler went away mid-flight; nothing left to notify.
            break;
        }
    }
}
