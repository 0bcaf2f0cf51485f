//! Blend Scheduler (spec.md §4.4): composes the Group Scheduler (highest
//! priority) and an ordered list of Scan Schedulers (fast -> medium -> slow)
//! under a global thread-reserve policy that is the central invariant
//! preventing cross-class starvation (SCHED-RESERVE / SCHED-LIVENESS,
//! spec.md §8). Grounded on
//! `examples/original_source/core/modules/wsched/BlendScheduler.h`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::worker::task::{Task, TaskId};

use super::Scheduler;

pub struct BlendScheduler {
    pool_size: usize,
    schedulers: Vec<Arc<dyn Scheduler>>,
    dispatch_map: Mutex<std::collections::HashMap<TaskId, usize>>,
    last_served: AtomicUsize,
}

impl BlendScheduler {
    /// `group` always occupies position 0 (highest priority); `scans` are
    /// appended in fast -> medium -> slow order.
    pub fn new(pool_size: usize, group: Arc<dyn Scheduler>, scans: Vec<Arc<dyn Scheduler>>) -> Arc<Self> {
        let mut schedulers = vec![group];
        schedulers.extend(scans);
        Arc::new(Self {
            pool_size,
            schedulers,
            dispatch_map: Mutex::new(std::collections::HashMap::new()),
            last_served: AtomicUsize::new(0),
        })
    }

    /// `P - sum(desired_reserve(S')) for S' != index`.
    fn available_threads(&self, index: usize) -> usize {
        let reserved_by_others: usize = self
            .schedulers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, s)| s.desired_reserve())
            .sum();
        self.pool_size.saturating_sub(reserved_by_others)
    }

    fn applied_budget(&self, index: usize) -> usize {
        let sched = &self.schedulers[index];
        sched.max_in_flight().min(self.available_threads(index))
    }

    /// Queue a task onto the sub-scheduler selected by `router` (the Blend
    /// Scheduler itself has no queue of its own; it routes to the first
    /// scan scheduler whose rating band accepts the task, or the group
    /// scheduler for non-scan tasks).
    pub fn queue_to(&self, index: usize, task: Arc<Task>) {
        self.schedulers[index].queue_task(task);
    }

    pub fn schedulers(&self) -> &[Arc<dyn Scheduler>] {
        &self.schedulers
    }

    /// Iterate sub-schedulers in priority order; return the first one that
    /// is ready AND whose applied-threads budget is positive. Ties among
    /// simultaneously-ready scan classes rotate through `last_served` for
    /// fairness.
    /// A sub-scheduler may dispatch only while its current `in_flight` count
    /// is still below its applied budget (`min(maxInFlight, availableThreads)`,
    /// SCHED-RESERVE, spec.md §8) — checking `applied_budget(index) > 0`
    /// alone would let a scheduler keep dispatching past `availableThreads`
    /// whenever `maxInFlight` is larger than its share.
    fn under_applied_budget(&self, index: usize) -> bool {
        self.schedulers[index].in_flight() < self.applied_budget(index)
    }

    pub fn get_cmd(&self) -> Option<Arc<Task>> {
        let n = self.schedulers.len();
        let start = self.last_served.load(Ordering::Relaxed);
        // Position 0 (group) always gets first refusal regardless of rotation.
        if self.schedulers[0].ready() && self.under_applied_budget(0) {
            if let Some(task) = self.schedulers[0].get_task() {
                self.note_dispatch(0, &task);
                return Some(task);
            }
        }
        for offset in 0..n.saturating_sub(1) {
            let index = 1 + (start + offset) % (n - 1).max(1);
            if index == 0 || index >= n {
                continue;
            }
            let sched = &self.schedulers[index];
            if sched.ready() && self.under_applied_budget(index) {
                if let Some(task) = sched.get_task() {
                    self.last_served.store(index, Ordering::Relaxed);
                    self.note_dispatch(index, &task);
                    return Some(task);
                }
            }
        }
        None
    }

    fn note_dispatch(&self, index: usize, task: &Arc<Task>) {
        self.dispatch_map.lock().insert(task.id, index);
        debug!(scheduler = self.schedulers[index].name(), task = ?task.id, "dispatching task");
    }

    pub fn command_start(&self, task: &Arc<Task>) {
        let index = *self.dispatch_map.lock().get(&task.id).expect("dispatched task must be mapped");
        self.schedulers[index].command_start(task);
    }

    /// Looks up the task in the dispatch map, forwards to the owning
    /// sub-scheduler, removes the map entry.
    pub fn command_finish(&self, task: &Arc<Task>) {
        let index = self.dispatch_map.lock().remove(&task.id);
        if let Some(index) = index {
            self.schedulers[index].command_finish(task);
        }
    }

    pub fn ready(&self) -> bool {
        self.schedulers.iter().enumerate().any(|(i, s)| s.ready() && self.under_applied_budget(i))
    }

    pub fn size(&self) -> usize {
        self.schedulers.iter().map(|s| s.size()).sum()
    }

    pub fn in_flight(&self) -> usize {
        self.schedulers.iter().map(|s| s.in_flight()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TaskMsg;
    use crate::worker::memman::MemoryManager;
    use crate::worker::sched::group::GroupScheduler;
    use crate::worker::sched::scan::ScanScheduler;

    fn task(job_id: u32, chunk_id: i32) -> Arc<Task> {
        Task::new(
            TaskId { query_id: 1, job_id },
            TaskMsg {
                session_id: 1,
                chunk_id,
                db: "db".into(),
                scan_priority: None,
                scan_tables: vec![],
                fragments: vec![],
            },
        )
    }

    fn build(pool_size: usize) -> (Arc<BlendScheduler>, Arc<GroupScheduler>, Vec<Arc<ScanScheduler>>) {
        let memman = MemoryManager::new(0);
        let group = GroupScheduler::new("group", 4, 4, 2);
        let scans: Vec<Arc<ScanScheduler>> = vec![
            ScanScheduler::new("fast", memman.clone(), 0, 9, 100, 2),
            ScanScheduler::new("medium", memman.clone(), 10, 19, 100, 2),
            ScanScheduler::new("slow", memman.clone(), 20, i32::MAX, 100, 2),
        ];
        let dyn_scans: Vec<Arc<dyn Scheduler>> = scans.iter().map(|s| s.clone() as Arc<dyn Scheduler>).collect();
        let blend = BlendScheduler::new(pool_size, group.clone(), dyn_scans);
        (blend, group, scans)
    }

    /// SCHED-RESERVE / SCHED-LIVENESS probe, spec.md §8 scenario 5:
    /// P=9, group maxReserve=2, three scan schedulers each maxReserve=2.
    /// Submit 10 slow-scan tasks; submit 1 group task while they run.
    /// Expect: the group task dispatches within at most 2 finishes.
    #[test]
    fn group_task_is_not_starved_by_ten_slow_scan_tasks() {
        let (blend, group, scans) = build(9);
        let slow = &scans[2];
        for i in 0..10u32 {
            slow.queue_task(task(i, 100 + i as i32));
        }
        group.queue_task(task(999, 1));

        let mut dispatched_from_group = false;
        let mut finishes = 0;
        let mut in_flight_tasks = Vec::new();
        for _ in 0..20 {
            while let Some(t) = blend.get_cmd() {
                blend.command_start(&t);
                if t.id.job_id == 999 {
                    dispatched_from_group = true;
                }
                in_flight_tasks.push(t);
            }
            if dispatched_from_group {
                break;
            }
            if let Some(t) = in_flight_tasks.pop() {
                blend.command_finish(&t);
                finishes += 1;
            }
            if finishes > 2 && !dispatched_from_group {
                break;
            }
        }
        assert!(dispatched_from_group, "group task starved past bound");
        assert!(finishes <= 2, "group task should dispatch within at most 2 finishes, took {finishes}");
    }

    #[test]
    fn available_threads_leaves_room_for_every_sub_scheduler() {
        let (blend, group, scans) = build(9);
        group.queue_task(task(1, 1));
        for s in &scans {
            s.queue_task(task(2, 1));
        }
        // With 4 sub-schedulers (group + 3 scans) all idle, each wants
        // desired_reserve=1, so available_threads(any) == 9 - 3*1 == 6.
        assert_eq!(blend.available_threads(0), 9 - 3);
    }
}
