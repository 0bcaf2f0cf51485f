//! Scan Scheduler (spec.md §4.3): a two-heap structure for ordered chunk
//! traversal. Grounded on
//! `examples/original_source/core/modules/wsched/SchedulerBase.h` for the
//! reserve/priority fields and on spec.md §8 scenario 6 for ordering.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::worker::memman::MemoryManager;
use crate::worker::task::Task;

use super::Scheduler;

struct ChunkEntry(Arc<Task>);

impl PartialEq for ChunkEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.chunk_id == other.0.chunk_id
    }
}
impl Eq for ChunkEntry {}
impl PartialOrd for ChunkEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ChunkEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.chunk_id.cmp(&other.0.chunk_id)
    }
}

struct Heaps {
    active: BinaryHeap<Reverse<ChunkEntry>>,
    pending: BinaryHeap<Reverse<ChunkEntry>>,
}

/// One scan scheduler per scan class (fast/medium/slow).
pub struct ScanScheduler {
    name: String,
    heaps: Mutex<Heaps>,
    memman: Arc<MemoryManager>,
    min_rating: i32,
    max_rating: i32,
    max_in_flight: usize,
    max_reserve: usize,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
}

impl ScanScheduler {
    pub fn new(
        name: impl Into<String>,
        memman: Arc<MemoryManager>,
        min_rating: i32,
        max_rating: i32,
        max_in_flight: usize,
        max_reserve: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            heaps: Mutex::new(Heaps {
                active: BinaryHeap::new(),
                pending: BinaryHeap::new(),
            }),
            memman,
            min_rating,
            max_rating,
            max_in_flight,
            max_reserve,
            in_flight: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        })
    }

    pub fn accepts(&self, scan_rating: i32) -> bool {
        scan_rating >= self.min_rating && scan_rating <= self.max_rating
    }

    /// Try to admit the active heap's top chunk. Attempts a normal (locked)
    /// lease first; when `flexible` is set and the locked attempt fails,
    /// retries with a flexible lease so scanning can still make progress
    /// under memory pressure.
    fn try_admit_top(&self, heaps: &mut Heaps, flexible: bool) -> bool {
        let Some(Reverse(ChunkEntry(task))) = heaps.active.peek() else {
            return false;
        };
        if !task.mem_handles.lock().is_empty() {
            return true; // already flagged memory-ok.
        }
        let prepare = self.memman.prepare(&task.msg.scan_tables, false);
        if prepare.denied.is_empty() {
            *task.mem_handles.lock() = prepare.granted;
            return true;
        }
        for h in prepare.granted {
            self.memman.release(h);
        }
        if flexible {
            let flex_prepare = self.memman.prepare(&task.msg.scan_tables, true);
            if flex_prepare.denied.is_empty() {
                *task.mem_handles.lock() = flex_prepare.granted;
                return true;
            }
            for h in flex_prepare.granted {
                self.memman.release(h);
            }
        }
        false
    }

    /// Core of `getTask`: swap active/pending when active is empty, then
    /// attempt admission of the new top, retrying flexibly if requested.
    pub fn get_task_with_mode(&self, flexible: bool) -> Option<Arc<Task>> {
        let mut heaps = self.heaps.lock();
        if heaps.active.is_empty() && !heaps.pending.is_empty() {
            std::mem::swap(&mut heaps.active, &mut heaps.pending);
        }
        if !self.try_admit_top(&mut heaps, flexible) {
            return None;
        }
        let Reverse(ChunkEntry(task)) = heaps.active.pop()?;
        self.queued.fetch_sub(1, Ordering::Relaxed);
        Some(task)
    }
}

impl Scheduler for ScanScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.queued.load(Ordering::Relaxed) > 0 && self.in_flight.load(Ordering::Relaxed) < self.max_in_flight
    }

    fn get_task(&self) -> Option<Arc<Task>> {
        self.get_task_with_mode(false)
    }

    fn size(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn desired_reserve(&self) -> usize {
        (self.in_flight() + 1).min(self.max_reserve)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    fn command_start(&self, _task: &Arc<Task>) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn command_finish(&self, task: &Arc<Task>) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        let mut handles = task.mem_handles.lock();
        for h in handles.drain(..) {
            self.memman.release(h);
        }
    }

    fn queue_task(&self, task: Arc<Task>) {
        let mut heaps = self.heaps.lock();
        heaps.pending.push(Reverse(ChunkEntry(task)));
        self.queued.fetch_add(1, Ordering::Relaxed);
    }
}
