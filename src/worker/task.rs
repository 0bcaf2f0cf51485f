//! Worker-side Task (spec.md §3). Grounded on
//! `examples/original_source/core/modules/wbase/Task.h`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::proto::TaskMsg;
use crate::worker::memman::MemHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub query_id: u64,
    pub job_id: u32,
}

/// A decoded request message plus execution metadata. Exactly one
/// scheduler owns a task at any time (spec.md §3); ownership is tracked
/// externally by the Blend Scheduler's dispatch map rather than inside
/// `Task` itself, matching `wbase::Task`'s "encapsulates nearly zero logic"
/// design note.
pub struct Task {
    pub id: TaskId,
    pub msg: TaskMsg,
    pub chunk_id: i32,
    pub scan_rating: i32,
    /// Residency handles held for this task's scan tables, one per table
    /// (spec.md §4.1/§4.3) — a task scanning several tables needs all of
    /// them resident for its whole execution, not just the first.
    pub mem_handles: parking_lot::Mutex<Vec<MemHandle>>,
    cancelled: AtomicBool,
}

impl Task {
    pub fn new(id: TaskId, msg: TaskMsg) -> Arc<Self> {
        let chunk_id = msg.chunk_id;
        let scan_rating = msg
            .scan_tables
            .iter()
            .map(|t| t.scan_rating)
            .max()
            .unwrap_or(0);
        Arc::new(Self {
            id,
            msg,
            chunk_id,
            scan_rating,
            mem_handles: parking_lot::Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
