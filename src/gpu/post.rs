use std::mem;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use crate::exec::controller::Event;
use crate::foundation::error::{TaskmillError, TaskmillResult};
use crate::task::contract::Task;

/// Binding to a device GPU context, provided by the embedding application.
///
/// The post-processor owns a dedicated thread; [`GpuContext::bind`] is called
/// once on that thread before any task is processed, and the context never
/// leaves it. Entering and leaving the context dominates per-item cost, which
/// is why the stage is batched.
pub trait GpuContext: Send {
    /// Make the context current on the calling thread.
    ///
    /// Failure surfaces as an initialization error to the scheduler's caller
    /// and leaves the GPU stage permanently unavailable for the session.
    fn bind(&mut self) -> TaskmillResult<()>;

    /// Called once after each batch, e.g. to flush device work.
    fn finish_batch(&mut self) {}
}

/// Second pipeline stage: batches CPU-finished tasks flagged as needing GPU
/// work and processes them together on the dedicated context thread.
///
/// Batches are flushed as a whole, never per item. A task enters the pending
/// batch only when it already finished its CPU stage, carries the GPU flag
/// and is not canceled; the scheduler enforces this at the enqueue site.
pub(crate) struct GpuPostProcessor {
    pending: Vec<Arc<dyn Task>>,
    in_flight: bool,
    flush_threshold: usize,
    batches: Option<Sender<Vec<Arc<dyn Task>>>>,
    worker: Option<JoinHandle<()>>,
}

impl GpuPostProcessor {
    /// Spawn the GPU context thread and wait for the bind handshake.
    pub(crate) fn initialize(
        mut ctx: Box<dyn GpuContext>,
        flush_threshold: usize,
        events: Sender<Event>,
    ) -> TaskmillResult<Self> {
        let (batches_tx, batches_rx) = mpsc::channel::<Vec<Arc<dyn Task>>>();
        let (bound_tx, bound_rx) = mpsc::channel::<TaskmillResult<()>>();

        let worker = std::thread::Builder::new()
            .name("taskmill-gpu".to_string())
            .spawn(move || {
                let bound = ctx.bind();
                let ok = bound.is_ok();
                let _ = bound_tx.send(bound);
                if !ok {
                    return;
                }
                while let Ok(batch) = batches_rx.recv() {
                    for task in &batch {
                        // Canceled after enqueue: skip the body, the
                        // scheduler still finalizes on flush-finished.
                        if task.lifecycle().is_canceled() {
                            continue;
                        }
                        task.gpu_process(ctx.as_mut());
                    }
                    ctx.finish_batch();
                    if events.send(Event::GpuFlushFinished { tasks: batch }).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| TaskmillError::init(format!("failed to spawn gpu thread: {e}")))?;

        let mut stage = Self {
            pending: Vec::new(),
            in_flight: false,
            flush_threshold: flush_threshold.max(1),
            batches: Some(batches_tx),
            worker: Some(worker),
        };

        match bound_rx.recv() {
            Ok(Ok(())) => Ok(stage),
            Ok(Err(e)) => {
                stage.shutdown();
                Err(e)
            }
            Err(_) => {
                stage.shutdown();
                Err(TaskmillError::init("gpu context thread exited before binding"))
            }
        }
    }

    /// Add a CPU-finished task to the pending batch.
    pub(crate) fn enqueue(&mut self, task: Arc<dyn Task>) {
        debug_assert!(task.needs_gpu_processing());
        debug_assert!(!task.lifecycle().is_canceled());
        self.pending.push(task);
    }

    /// `true` when the pending batch reached the automatic flush threshold.
    pub(crate) fn should_flush(&self) -> bool {
        !self.in_flight && self.pending.len() >= self.flush_threshold
    }

    /// Send the whole pending batch to the context thread.
    ///
    /// No-op while a previous flush is still in flight or when nothing is
    /// pending; newly enqueued tasks simply accumulate for the next flush.
    pub(crate) fn flush(&mut self) {
        if self.in_flight || self.pending.is_empty() {
            return;
        }
        let batch = mem::take(&mut self.pending);
        tracing::debug!(batch_len = batch.len(), "flushing gpu batch");
        self.in_flight = true;
        if let Some(tx) = &self.batches {
            let _ = tx.send(batch);
        }
    }

    /// Mark the in-flight flush as handled. Called by the scheduler when the
    /// `GpuFlushFinished` event arrives.
    pub(crate) fn on_flush_finished(&mut self) {
        self.in_flight = false;
    }

    /// `true` when no batch is pending and no flush is in flight. This is the
    /// "processed all" condition feeding the global quiescence check.
    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.in_flight
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Close the batch channel and join the context thread.
    pub(crate) fn shutdown(&mut self) {
        self.batches.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for GpuPostProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
