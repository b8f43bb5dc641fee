use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::exec::controller::{Event, ExecController, ExecLane};
use crate::foundation::error::{TaskmillError, TaskmillResult};
use crate::foundation::ids::ExecId;
use crate::gpu::post::{GpuContext, GpuPostProcessor};
use crate::task::contract::Task;
use crate::task::queue::TaskQueue;

/// Scheduler configuration.
///
/// A serde boundary so embedding applications can keep scheduler settings in
/// project files.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerOpts {
    /// CPU worker count. `None` sizes the pool to host parallelism.
    pub cpu_workers: Option<usize>,
    /// Cap on backup disk executors grown to escape stalls. At the cap with
    /// no free backup, stall signals are ignored and the stalled primary
    /// keeps its role. `0` disables the escape valve entirely.
    pub max_disk_backups: usize,
    /// Pending GPU batch size that triggers an automatic flush ahead of the
    /// per-tick flush in [`TaskScheduler::que_tasks`].
    pub gpu_flush_threshold: usize,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            cpu_workers: None,
            max_disk_backups: 4,
            gpu_flush_threshold: 16,
        }
    }
}

/// Passive usage counters intended for an observability/status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerUsage {
    /// Total CPU executors in the pool.
    pub cpu_pool_size: usize,
    /// CPU executors currently free.
    pub free_cpu_executors: usize,
    /// Whether the primary disk executor has an assignment in flight.
    pub disk_busy: bool,
    /// Backup disk executors created so far, free or still draining.
    pub disk_backups: usize,
    /// Tasks waiting in the GPU batch.
    pub gpu_pending: usize,
}

/// The asynchronous multi-resource task scheduler.
///
/// One instance is owned by the application/session context and passed
/// explicitly to every producer that needs to enqueue work; there is no
/// ambient global instance.
///
/// All internal structures (pending lists, queues, free-lists, busy flags)
/// are owned and mutated exclusively by the thread driving this value.
/// Workers only execute task bodies and report back through the
/// completion-event channel, which [`TaskScheduler::pump`] drains on the
/// control thread. None of the bookkeeping entry points block; only
/// [`TaskScheduler::pump_wait`] and [`TaskScheduler::wait_until_finished`]
/// do, by explicit caller choice.
pub struct TaskScheduler {
    opts: SchedulerOpts,

    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    next_exec_id: u32,

    cpu_execs: Vec<ExecController>,
    free_cpu: SmallVec<[usize; 16]>,
    sched_cpu: Vec<Arc<dyn Task>>,
    qued_cpu: TaskQueue,
    cpu_queing: bool,
    cpu_in_flight: usize,

    disk_execs: Vec<ExecController>,
    primary_disk: usize,
    free_backup_disk: SmallVec<[usize; 4]>,
    disk_busy: bool,
    sched_disk: Vec<Arc<dyn Task>>,
    qued_disk: TaskQueue,
    disk_in_flight: usize,

    gpu: Option<GpuPostProcessor>,

    tasks_finished: Option<Box<dyn FnMut()>>,
    finished_notified: bool,
}

impl TaskScheduler {
    /// Spawn the CPU pool, the primary disk executor and one warm backup.
    pub fn new(opts: SchedulerOpts) -> TaskmillResult<Self> {
        if opts.cpu_workers == Some(0) {
            return Err(TaskmillError::validation(
                "SchedulerOpts cpu_workers must be >= 1 when set",
            ));
        }

        let (events_tx, events_rx) = mpsc::channel();
        let cpu_count = opts.cpu_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });

        let mut scheduler = Self {
            opts,
            events_tx,
            events_rx,
            next_exec_id: 0,
            cpu_execs: Vec::with_capacity(cpu_count),
            free_cpu: SmallVec::new(),
            sched_cpu: Vec::new(),
            qued_cpu: TaskQueue::new(),
            cpu_queing: false,
            cpu_in_flight: 0,
            disk_execs: Vec::new(),
            primary_disk: 0,
            free_backup_disk: SmallVec::new(),
            disk_busy: false,
            sched_disk: Vec::new(),
            qued_disk: TaskQueue::new(),
            disk_in_flight: 0,
            gpu: None,
            tasks_finished: None,
            finished_notified: false,
        };

        for _ in 0..cpu_count {
            let idx = scheduler.cpu_execs.len();
            let exec = ExecController::spawn(
                scheduler.take_exec_id(),
                ExecLane::Cpu,
                scheduler.events_tx.clone(),
            )?;
            scheduler.cpu_execs.push(exec);
            scheduler.free_cpu.push(idx);
        }

        let primary = scheduler.spawn_disk_exec()?;
        scheduler.primary_disk = primary;
        if scheduler.opts.max_disk_backups > 0 {
            let backup = scheduler.spawn_disk_exec()?;
            scheduler.free_backup_disk.push(backup);
        }

        tracing::debug!(
            cpu_pool = scheduler.cpu_execs.len(),
            max_disk_backups = scheduler.opts.max_disk_backups,
            "task scheduler started"
        );
        Ok(scheduler)
    }

    /// Initialize the GPU post-processing stage.
    ///
    /// Binds `ctx` on a dedicated context thread and waits for the handshake.
    /// On failure the stage stays unavailable for the whole session: tasks
    /// flagged for GPU work are then finalized without post-processing (a
    /// `warn` is logged per task).
    #[tracing::instrument(skip(self, ctx))]
    pub fn initialize_gpu(&mut self, ctx: Box<dyn GpuContext>) -> TaskmillResult<()> {
        if self.gpu.is_some() {
            return Err(TaskmillError::validation("gpu stage already initialized"));
        }
        let stage = GpuPostProcessor::initialize(
            ctx,
            self.opts.gpu_flush_threshold,
            self.events_tx.clone(),
        )?;
        self.gpu = Some(stage);
        Ok(())
    }

    /// Register the "all work finished" notification.
    ///
    /// Fires at most once per quiescence window: after it fires, scheduling
    /// new work re-arms it.
    pub fn set_tasks_finished_listener(&mut self, listener: impl FnMut() + 'static) {
        self.tasks_finished = Some(Box::new(listener));
    }

    /// Append a task to the pending CPU list. O(1), never blocks, never
    /// dispatches immediately.
    pub fn schedule_cpu_task(&mut self, task: Arc<dyn Task>) {
        self.finished_notified = false;
        self.sched_cpu.push(task);
    }

    /// Append a task to the pending disk list. O(1), never blocks, never
    /// dispatches immediately.
    pub fn schedule_disk_task(&mut self, task: Arc<dyn Task>) {
        self.finished_notified = false;
        self.sched_disk.push(task);
    }

    /// Admission-controlled transfer of pending tasks into the live queues,
    /// followed by dispatch passes. Called once per interactive tick.
    ///
    /// Also triggers the per-tick GPU batch flush and, with nothing left
    /// anywhere, the "all work finished" notification (vacuous quiescence
    /// included).
    #[tracing::instrument(skip(self))]
    pub fn que_tasks(&mut self) {
        self.que_scheduled_cpu_tasks();
        self.que_scheduled_disk_tasks();
        if let Some(gpu) = &mut self.gpu {
            gpu.flush();
        }
        self.notify_if_quiescent();
    }

    /// Drain the completion-event channel without blocking, handling each
    /// event on the calling (control) thread. Returns the number of events
    /// handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.events_rx.try_recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Block for at least one completion event (up to `timeout`), then drain
    /// the rest without blocking. Returns the number of events handled.
    pub fn pump_wait(&mut self, timeout: Duration) -> TaskmillResult<usize> {
        let first = self.events_rx.recv_timeout(timeout);
        match first {
            Ok(event) => {
                self.handle_event(event);
                Ok(1 + self.pump())
            }
            Err(RecvTimeoutError::Timeout) => Err(TaskmillError::timeout(
                "no completion event arrived within the wait window",
            )),
            Err(RecvTimeoutError::Disconnected) => Err(TaskmillError::init(
                "completion-event channel disconnected",
            )),
        }
    }

    /// Drive the scheduler until quiescent or until `timeout` elapses.
    ///
    /// Convenience for batch (non-interactive) use and tests; interactive
    /// applications call [`TaskScheduler::que_tasks`] and
    /// [`TaskScheduler::pump`] from their own loop instead.
    pub fn wait_until_finished(&mut self, timeout: Duration) -> TaskmillResult<()> {
        let deadline = Instant::now() + timeout;
        self.que_tasks();
        while !self.is_quiescent() {
            let now = Instant::now();
            if now >= deadline {
                return Err(TaskmillError::timeout(
                    "scheduled work did not finish within the wait window",
                ));
            }
            self.pump_wait(deadline - now)?;
            self.que_tasks();
        }
        Ok(())
    }

    /// `true` when no pending, queued or in-flight work remains across the
    /// CPU, disk and GPU stages.
    pub fn is_quiescent(&self) -> bool {
        self.sched_cpu.is_empty()
            && self.sched_disk.is_empty()
            && self.qued_cpu.is_empty()
            && self.qued_disk.is_empty()
            && self.cpu_in_flight == 0
            && self.disk_in_flight == 0
            && self.gpu.as_ref().is_none_or(|gpu| gpu.is_idle())
    }

    /// Snapshot of the usage counters.
    pub fn usage(&self) -> SchedulerUsage {
        SchedulerUsage {
            cpu_pool_size: self.cpu_execs.len(),
            free_cpu_executors: self.free_cpu.len(),
            disk_busy: self.disk_busy,
            disk_backups: self.disk_execs.len().saturating_sub(1),
            gpu_pending: self.gpu.as_ref().map_or(0, |gpu| gpu.pending_len()),
        }
    }

    /// CPU executors currently free.
    pub fn free_cpu_executors(&self) -> usize {
        self.free_cpu.len()
    }

    /// Whether the primary disk executor has an assignment in flight.
    pub fn disk_busy(&self) -> bool {
        self.disk_busy
    }

    /// Stop accepting work and join every worker thread, blocking until all
    /// in-flight task bodies have exited cleanly.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    // --- control-thread internals -------------------------------------------

    fn take_exec_id(&mut self) -> ExecId {
        let id = ExecId(self.next_exec_id);
        self.next_exec_id += 1;
        id
    }

    fn spawn_disk_exec(&mut self) -> TaskmillResult<usize> {
        let exec = ExecController::spawn(
            self.take_exec_id(),
            ExecLane::Disk,
            self.events_tx.clone(),
        )?;
        let idx = self.disk_execs.len();
        self.disk_execs.push(exec);
        Ok(idx)
    }

    fn backup_count(&self) -> usize {
        self.disk_execs.len().saturating_sub(1)
    }

    fn should_que_more_cpu_tasks(&self) -> bool {
        !self.free_cpu.is_empty()
            && !self.cpu_queing
            && self.qued_cpu.count_ques() < self.cpu_execs.len()
    }

    fn que_scheduled_cpu_tasks(&mut self) {
        if self.sched_cpu.is_empty() || !self.should_que_more_cpu_tasks() {
            return;
        }
        self.cpu_queing = true;
        self.qued_cpu.begin_que();
        for task in self.sched_cpu.drain(..) {
            if task.lifecycle().is_canceled() {
                task.finished_processing();
                continue;
            }
            if !task.lifecycle().is_queued() {
                task.lifecycle().mark_queued();
            }
            self.qued_cpu.add_task(task);
        }
        self.qued_cpu.end_que();
        self.cpu_queing = false;

        self.process_next_qued_cpu_tasks();
    }

    fn que_scheduled_disk_tasks(&mut self) {
        if self.disk_busy || self.sched_disk.is_empty() {
            return;
        }
        let pending: Vec<_> = self.sched_disk.drain(..).collect();
        for task in pending {
            if task.lifecycle().is_canceled() {
                task.finished_processing();
                continue;
            }
            if !task.lifecycle().is_queued() {
                task.lifecycle().mark_queued();
            }
            self.qued_disk.add_task(task);
            // Disk volume is far lower than CPU; a dispatch attempt per
            // insertion is fine here.
            self.try_process_next_qued_disk_task();
        }
    }

    fn process_next_tasks(&mut self) {
        self.try_process_next_qued_disk_task();
        self.process_next_qued_cpu_tasks();
    }

    fn process_next_qued_cpu_tasks(&mut self) {
        while let Some(&exec_idx) = self.free_cpu.last() {
            let Some(task) = self.qued_cpu.take_ready() else {
                break;
            };
            if !task.lifecycle().mark_processing() {
                // Canceled between the ready scan and the claim.
                task.finished_processing();
                continue;
            }
            task.about_to_process();
            self.free_cpu.pop();
            self.cpu_in_flight += 1;
            tracing::debug!(
                task = task.id().0,
                exec = self.cpu_execs[exec_idx].id().0,
                "assigned cpu task"
            );
            self.cpu_execs[exec_idx].assign(task);
        }
    }

    fn try_process_next_qued_disk_task(&mut self) {
        if !self.disk_busy {
            self.process_next_qued_disk_task();
        }
    }

    fn process_next_qued_disk_task(&mut self) {
        if self.disk_busy {
            return;
        }
        loop {
            let Some(task) = self.qued_disk.take_ready() else {
                return;
            };
            if !task.lifecycle().mark_processing() {
                task.finished_processing();
                continue;
            }
            task.about_to_process();
            self.disk_busy = true;
            self.disk_in_flight += 1;
            tracing::debug!(
                task = task.id().0,
                exec = self.disk_execs[self.primary_disk].id().0,
                "assigned disk task to primary"
            );
            self.disk_execs[self.primary_disk].assign(task);
            return;
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::TaskFinished { task, exec, lane } => match lane {
                ExecLane::Cpu => self.after_cpu_task_finished(task, exec),
                ExecLane::Disk => self.after_disk_task_finished(task, exec),
            },
            Event::DiskPartialProgress { exec } => self.switch_to_backup_disk_executor(exec),
            Event::GpuFlushFinished { tasks } => self.after_gpu_flush_finished(tasks),
        }
    }

    fn after_cpu_task_finished(&mut self, task: Arc<dyn Task>, exec: ExecId) {
        if let Some(idx) = self.cpu_index(exec) {
            self.free_cpu.push(idx);
        }
        self.cpu_in_flight = self.cpu_in_flight.saturating_sub(1);

        if task.lifecycle().is_canceled() {
            task.finished_processing();
        } else {
            task.lifecycle().mark_finished();
            if task.needs_gpu_processing() {
                match &mut self.gpu {
                    Some(gpu) => {
                        gpu.enqueue(task);
                        if gpu.should_flush() {
                            gpu.flush();
                        }
                    }
                    None => {
                        tracing::warn!(
                            task = task.id().0,
                            "gpu post-processing requested but no gpu stage is \
                             initialized; finishing without it"
                        );
                        task.finished_processing();
                    }
                }
            } else {
                task.finished_processing();
            }
        }

        self.process_next_tasks();
        if self.cpu_in_flight == 0 {
            self.que_tasks();
        }
        self.notify_if_quiescent();
    }

    fn after_disk_task_finished(&mut self, task: Arc<dyn Task>, exec: ExecId) {
        self.disk_in_flight = self.disk_in_flight.saturating_sub(1);
        if let Some(idx) = self.disk_index(exec) {
            if idx == self.primary_disk {
                self.disk_busy = false;
            } else {
                // A demoted executor finished draining its long task.
                self.free_backup_disk.push(idx);
            }
        }

        if task.lifecycle().is_canceled() {
            task.finished_processing();
        } else {
            task.lifecycle().mark_finished();
            task.finished_processing();
        }

        self.process_next_tasks();
        if self.disk_in_flight == 0 {
            self.que_tasks();
        }
        self.notify_if_quiescent();
    }

    fn switch_to_backup_disk_executor(&mut self, exec: ExecId) {
        if !self.disk_busy {
            return;
        }
        let Some(idx) = self.disk_index(exec) else {
            return;
        };
        if idx != self.primary_disk {
            // Stale yield from an executor that was already demoted.
            return;
        }

        let promoted = if let Some(free) = self.free_backup_disk.pop() {
            Some(free)
        } else if self.backup_count() < self.opts.max_disk_backups {
            match self.spawn_disk_exec() {
                Ok(new_idx) => Some(new_idx),
                Err(e) => {
                    tracing::warn!(error = %e, "could not grow backup disk pool");
                    None
                }
            }
        } else {
            None
        };

        let Some(promoted) = promoted else {
            tracing::debug!("backup disk pool saturated; stalled primary keeps its role");
            return;
        };

        tracing::debug!(
            old = self.disk_execs[self.primary_disk].id().0,
            new = self.disk_execs[promoted].id().0,
            "promoting backup disk executor to primary"
        );
        self.primary_disk = promoted;
        self.disk_busy = false;
        self.process_next_qued_disk_task();
    }

    fn after_gpu_flush_finished(&mut self, tasks: Vec<Arc<dyn Task>>) {
        if let Some(gpu) = &mut self.gpu {
            gpu.on_flush_finished();
        }
        for task in tasks {
            // Non-canceled tasks were marked Finished at CPU completion; this
            // is their deferred terminal hook. Canceled tasks get the hook
            // too, their state stays Canceled.
            task.finished_processing();
        }
        if let Some(gpu) = &mut self.gpu {
            // Pipeline whatever accumulated while the batch was on the GPU.
            gpu.flush();
        }

        self.process_next_tasks();
        if self.cpu_in_flight == 0 && self.disk_in_flight == 0 {
            self.que_tasks();
        }
        self.notify_if_quiescent();
    }

    fn notify_if_quiescent(&mut self) {
        if self.finished_notified || !self.is_quiescent() {
            return;
        }
        self.finished_notified = true;
        tracing::debug!("all scheduled work finished");
        if let Some(listener) = &mut self.tasks_finished {
            listener();
        }
    }

    fn cpu_index(&self, exec: ExecId) -> Option<usize> {
        self.cpu_execs.iter().position(|e| e.id() == exec)
    }

    fn disk_index(&self, exec: ExecId) -> Option<usize> {
        self.disk_execs.iter().position(|e| e.id() == exec)
    }

    fn shutdown_inner(&mut self) {
        for exec in &mut self.cpu_execs {
            exec.shutdown();
        }
        for exec in &mut self.disk_execs {
            exec.shutdown();
        }
        if let Some(gpu) = &mut self.gpu {
            gpu.shutdown();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
