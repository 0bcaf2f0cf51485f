//! WorkerForeman registry (supplemented feature; see SPEC_FULL.md
//! "SUPPLEMENTED FEATURES" item 3). Grounded on
//! `examples/original_source/worker/src/TodoList.cc` and
//! `core/modules/wcontrol/Foreman.cc`: a registry of in-flight tasks the
//! worker session layer consults to turn a czar-initiated cancel into a
//! concrete `Task::cancel()` call, since the czar has no direct handle to a
//! worker-side `Task` object.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::worker::task::{Task, TaskId};

#[derive(Default)]
pub struct WorkerForeman {
    live: Mutex<HashMap<TaskId, Arc<Task>>>,
}

impl WorkerForeman {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, task: Arc<Task>) {
        self.live.lock().insert(task.id, task);
    }

    pub fn deregister(&self, id: TaskId) {
        self.live.lock().remove(&id);
    }

    /// Cancel a single in-flight task by id. Idempotent: a task already
    /// cancelled or already deregistered is simply a no-op.
    pub fn cancel(&self, id: TaskId) {
        if let Some(task) = self.live.lock().get(&id) {
            debug!(task = ?id, "foreman cancelling task");
            task.cancel();
        }
    }

    /// Cancel every live task belonging to `query_id`, used when a whole
    /// user query is torn down.
    pub fn cancel_query(&self, query_id: u64) {
        let live = self.live.lock();
        for (id, task) in live.iter() {
            if id.query_id == query_id {
                task.cancel();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TaskMsg;

    fn task(query_id: u64, job_id: u32) -> Arc<Task> {
        Task::new(
            TaskId { query_id, job_id },
            TaskMsg {
                session_id: 1,
                chunk_id: 1,
                db: "db".into(),
                scan_priority: None,
                scan_tables: vec![],
                fragments: vec![],
            },
        )
    }

    #[test]
    fn cancel_query_cancels_all_its_tasks_but_not_others() {
        let foreman = WorkerForeman::new();
        let t1 = task(1, 1);
        let t2 = task(1, 2);
        let t3 = task(2, 1);
        foreman.register(t1.clone());
        foreman.register(t2.clone());
        foreman.register(t3.clone());

        foreman.cancel_query(1);

        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert!(!t3.is_cancelled());
    }

    #[test]
    fn deregister_then_cancel_is_a_harmless_no_op() {
        let foreman = WorkerForeman::new();
        let t1 = task(1, 1);
        foreman.register(t1.clone());
        foreman.deregister(t1.id);
        foreman.cancel(t1.id); // must not panic, must not reach t1.
        assert!(!t1.is_cancelled());
    }
}
