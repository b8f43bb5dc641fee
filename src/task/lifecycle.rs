use std::sync::atomic::{AtomicU8, Ordering};

/// Position of a task in its lifecycle state machine.
///
/// Legal transitions: `Created → Queued → Processing → Finished`, with
/// `Canceled` reachable from `Created`, `Queued` or `Processing`. A canceled
/// task never advances to `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TaskState {
    /// Built by a producer, not yet handed to the scheduler.
    Created,
    /// Accepted into a holding queue, waiting for an executor.
    Queued,
    /// Claimed by an executor; the body is (or is about to be) running.
    Processing,
    /// Terminal: the executor reported completion and the task was finalized.
    Finished,
    /// Terminal: abandoned by its producer. In-flight bodies are not aborted;
    /// the scheduler observes this state at completion time.
    Canceled,
}

const CREATED: u8 = 0;
const QUEUED: u8 = 1;
const PROCESSING: u8 = 2;
const FINISHED: u8 = 3;
const CANCELED: u8 = 4;

fn encode(state: TaskState) -> u8 {
    match state {
        TaskState::Created => CREATED,
        TaskState::Queued => QUEUED,
        TaskState::Processing => PROCESSING,
        TaskState::Finished => FINISHED,
        TaskState::Canceled => CANCELED,
    }
}

fn decode(raw: u8) -> TaskState {
    match raw {
        CREATED => TaskState::Created,
        QUEUED => TaskState::Queued,
        PROCESSING => TaskState::Processing,
        FINISHED => TaskState::Finished,
        _ => TaskState::Canceled,
    }
}

/// Atomic lifecycle cell embedded in every task.
///
/// The scheduler drives the forward transitions on its control thread;
/// [`TaskLifecycle::cancel`] may be called from any thread by the producer.
/// Illegal transitions are rejected (the cell is left unchanged and the
/// mutator returns `false`), which is what keeps `Canceled` terminal even
/// when a worker finishes the body afterwards.
#[derive(Debug)]
pub struct TaskLifecycle {
    state: AtomicU8,
}

impl TaskLifecycle {
    /// A fresh cell in [`TaskState::Created`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(CREATED),
        }
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// `true` once the task was accepted into a holding queue.
    pub fn is_queued(&self) -> bool {
        self.state() == TaskState::Queued
    }

    /// `true` when the producer abandoned the task.
    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    /// `Created → Queued`. Returns whether the transition took effect.
    pub fn mark_queued(&self) -> bool {
        self.transition(TaskState::Created, TaskState::Queued)
    }

    /// `Queued → Processing`. Returns whether the transition took effect.
    pub fn mark_processing(&self) -> bool {
        self.transition(TaskState::Queued, TaskState::Processing)
    }

    /// `Processing → Finished`. Never succeeds from `Canceled`.
    pub fn mark_finished(&self) -> bool {
        self.transition(TaskState::Processing, TaskState::Finished)
    }

    /// Cancel from `Created`, `Queued` or `Processing`. Returns `false` when
    /// the task already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if matches!(decode(cur), TaskState::Finished | TaskState::Canceled) {
                return false;
            }
            match self.state.compare_exchange(
                cur,
                CANCELED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(encode(from), encode(to), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for TaskLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_chain_is_legal() {
        let cell = TaskLifecycle::new();
        assert_eq!(cell.state(), TaskState::Created);
        assert!(cell.mark_queued());
        assert!(cell.is_queued());
        assert!(cell.mark_processing());
        assert!(cell.mark_finished());
        assert_eq!(cell.state(), TaskState::Finished);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let cell = TaskLifecycle::new();
        assert!(!cell.mark_processing());
        assert!(!cell.mark_finished());
        assert_eq!(cell.state(), TaskState::Created);
    }

    #[test]
    fn cancel_reaches_terminal_from_every_live_state() {
        let created = TaskLifecycle::new();
        assert!(created.cancel());

        let queued = TaskLifecycle::new();
        queued.mark_queued();
        assert!(queued.cancel());

        let processing = TaskLifecycle::new();
        processing.mark_queued();
        processing.mark_processing();
        assert!(processing.cancel());
        assert!(processing.is_canceled());
    }

    #[test]
    fn canceled_never_finishes() {
        let cell = TaskLifecycle::new();
        cell.mark_queued();
        cell.mark_processing();
        assert!(cell.cancel());
        assert!(!cell.mark_finished());
        assert_eq!(cell.state(), TaskState::Canceled);
    }

    #[test]
    fn finished_cannot_be_canceled() {
        let cell = TaskLifecycle::new();
        cell.mark_queued();
        cell.mark_processing();
        cell.mark_finished();
        assert!(!cell.cancel());
        assert_eq!(cell.state(), TaskState::Finished);
    }
}
