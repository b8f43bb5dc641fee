use std::sync::Arc;

use smallvec::SmallVec;

use crate::task::contract::Task;

type Que = SmallVec<[Arc<dyn Task>; 4]>;

/// Ordered, dependency-aware holding area for tasks that are `Queued` but not
/// yet assigned an executor.
///
/// Tasks are grouped into "ques": one que per bulk-enqueue bracket. The que
/// count (not the task count) is the depth used for admission control, which
/// caps lookahead at one bracket per free dispatch opportunity.
///
/// [`TaskQueue::take_ready`] preserves FIFO order among ready candidates and
/// skips tasks whose [`Task::ready_to_process`] does not hold yet. Canceled
/// tasks encountered during a scan are dropped; dropping is their terminal
/// observation, so the queue fires [`Task::finished_processing`] for them.
pub struct TaskQueue {
    ques: Vec<Que>,
    queing: bool,
}

impl TaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            ques: Vec::new(),
            queing: false,
        }
    }

    /// Open a bulk-insertion bracket.
    ///
    /// Insertions inside the bracket land in one shared que and must not
    /// trigger dispatch attempts; the caller runs a single dispatch pass
    /// after [`TaskQueue::end_que`].
    pub fn begin_que(&mut self) {
        debug_assert!(!self.queing, "begin_que inside an open bracket");
        self.queing = true;
        self.ques.push(Que::new());
    }

    /// Close the current bulk-insertion bracket.
    pub fn end_que(&mut self) {
        debug_assert!(self.queing, "end_que without begin_que");
        self.queing = false;
        if let Some(last) = self.ques.last()
            && last.is_empty()
        {
            self.ques.pop();
        }
    }

    /// Append one task, preserving insertion order.
    ///
    /// Outside a bracket the task forms a que of its own.
    pub fn add_task(&mut self, task: Arc<dyn Task>) {
        if self.queing {
            if let Some(last) = self.ques.last_mut() {
                last.push(task);
                return;
            }
        }
        let mut que = Que::new();
        que.push(task);
        self.ques.push(que);
    }

    /// Number of ques currently held. This is the admission-control depth.
    pub fn count_ques(&self) -> usize {
        self.ques.len()
    }

    /// Total number of held tasks.
    pub fn len(&self) -> usize {
        self.ques.iter().map(|q| q.len()).sum()
    }

    /// `true` when no tasks are held.
    pub fn is_empty(&self) -> bool {
        self.ques.iter().all(|q| q.is_empty())
    }

    /// Remove and return the earliest-inserted ready task, if any.
    ///
    /// Not-ready tasks keep their position and are retried on the next scan.
    /// Must not be called inside an open bracket.
    pub fn take_ready(&mut self) -> Option<Arc<dyn Task>> {
        debug_assert!(!self.queing, "take_ready inside an open bracket");
        let mut qi = 0;
        while qi < self.ques.len() {
            let que = &mut self.ques[qi];
            let mut ti = 0;
            let mut found = None;
            while ti < que.len() {
                if que[ti].lifecycle().is_canceled() {
                    let dropped = que.remove(ti);
                    dropped.finished_processing();
                    continue;
                }
                if que[ti].ready_to_process() {
                    found = Some(que.remove(ti));
                    break;
                }
                ti += 1;
            }
            if que.is_empty() {
                self.ques.remove(qi);
            } else {
                qi += 1;
            }
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
