#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use taskmill::{
    ExecCx, GpuContext, Task, TaskId, TaskLifecycle, TaskmillError, TaskmillResult,
};

/// Install a fmt subscriber once per test binary.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A gate a worker thread can block on until the test opens it.
pub struct Gate {
    opened: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub fn open(&self) {
        let mut opened = self.opened.lock().unwrap();
        *opened = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut opened = self.opened.lock().unwrap();
        while !*opened {
            opened = self.cv.wait(opened).unwrap();
        }
    }
}

/// Instrumented task used by the scheduler scenarios.
///
/// Counters record how often each contract hook ran so tests can assert the
/// exactly-once discipline.
pub struct TestTask {
    id: TaskId,
    lifecycle: TaskLifecycle,
    ready: AtomicBool,
    needs_gpu: bool,
    stall_gate: Option<Arc<Gate>>,
    body_gate: Option<Arc<Gate>>,
    gpu_gate: Option<Arc<Gate>>,
    pub processed: AtomicUsize,
    pub gpu_processed: AtomicUsize,
    pub about_calls: AtomicUsize,
    pub finished_calls: AtomicUsize,
}

pub struct TestTaskBuilder {
    id: u64,
    ready: bool,
    needs_gpu: bool,
    stall_gate: Option<Arc<Gate>>,
    body_gate: Option<Arc<Gate>>,
    gpu_gate: Option<Arc<Gate>>,
}

impl TestTaskBuilder {
    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn needs_gpu(mut self) -> Self {
        self.needs_gpu = true;
        self
    }

    /// Block the work body on `gate` right before it yields the primary
    /// disk role.
    pub fn stall_gate(mut self, gate: Arc<Gate>) -> Self {
        self.stall_gate = Some(gate);
        self
    }

    /// Block the work body on `gate` before it returns.
    pub fn body_gate(mut self, gate: Arc<Gate>) -> Self {
        self.body_gate = Some(gate);
        self
    }

    /// Block the GPU stage body on `gate`.
    pub fn gpu_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gpu_gate = Some(gate);
        self
    }

    pub fn build(self) -> Arc<TestTask> {
        Arc::new(TestTask {
            id: TaskId(self.id),
            lifecycle: TaskLifecycle::new(),
            ready: AtomicBool::new(self.ready),
            needs_gpu: self.needs_gpu,
            stall_gate: self.stall_gate,
            body_gate: self.body_gate,
            gpu_gate: self.gpu_gate,
            processed: AtomicUsize::new(0),
            gpu_processed: AtomicUsize::new(0),
            about_calls: AtomicUsize::new(0),
            finished_calls: AtomicUsize::new(0),
        })
    }
}

impl TestTask {
    pub fn builder(id: u64) -> TestTaskBuilder {
        TestTaskBuilder {
            id,
            ready: true,
            needs_gpu: false,
            stall_gate: None,
            body_gate: None,
            gpu_gate: None,
        }
    }

    /// An always-ready task with an instant body.
    pub fn ready(id: u64) -> Arc<Self> {
        Self::builder(id).build()
    }

    /// A task whose readiness predicate starts out false.
    pub fn not_ready(id: u64) -> Arc<Self> {
        Self::builder(id).not_ready().build()
    }

    /// An always-ready task whose body blocks on `gate`.
    pub fn gated(id: u64, gate: Arc<Gate>) -> Arc<Self> {
        Self::builder(id).body_gate(gate).build()
    }

    /// A disk task that waits on `stall`, yields the primary role, then waits
    /// on `finish` before completing.
    pub fn stalling(id: u64, stall: Arc<Gate>, finish: Arc<Gate>) -> Arc<Self> {
        Self::builder(id).stall_gate(stall).body_gate(finish).build()
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

impl Task for TestTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    fn ready_to_process(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn needs_gpu_processing(&self) -> bool {
        self.needs_gpu
    }

    fn about_to_process(&self) {
        self.about_calls.fetch_add(1, Ordering::AcqRel);
    }

    fn finished_processing(&self) {
        self.finished_calls.fetch_add(1, Ordering::AcqRel);
    }

    fn process(&self, cx: &mut ExecCx) {
        if let Some(gate) = &self.stall_gate {
            gate.wait();
            cx.yield_primary();
        }
        if let Some(gate) = &self.body_gate {
            gate.wait();
        }
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    fn gpu_process(&self, _gpu: &mut dyn GpuContext) {
        if let Some(gate) = &self.gpu_gate {
            gate.wait();
        }
        self.gpu_processed.fetch_add(1, Ordering::AcqRel);
    }
}

/// GPU context fake that binds successfully and counts batches.
#[derive(Default)]
pub struct OkGpu {
    pub batches: Arc<AtomicUsize>,
}

impl GpuContext for OkGpu {
    fn bind(&mut self) -> TaskmillResult<()> {
        Ok(())
    }

    fn finish_batch(&mut self) {
        self.batches.fetch_add(1, Ordering::AcqRel);
    }
}

/// GPU context fake whose bind always fails.
pub struct NoGpu;

impl GpuContext for NoGpu {
    fn bind(&mut self) -> TaskmillResult<()> {
        Err(TaskmillError::init("no gpu device available"))
    }
}
