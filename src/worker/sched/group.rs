//! Group Scheduler (spec.md §4.2): FIFO with per-chunk coalescing for
//! interactive (non-scan) tasks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::worker::task::Task;

use super::Scheduler;

struct Group {
    chunk_id: i32,
    tasks: VecDeque<Arc<Task>>,
}

pub struct GroupScheduler {
    name: String,
    groups: Mutex<VecDeque<Group>>,
    max_group_size: usize,
    max_in_flight: usize,
    max_reserve: usize,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
}

impl GroupScheduler {
    pub fn new(name: impl Into<String>, max_group_size: usize, max_in_flight: usize, max_reserve: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            groups: Mutex::new(VecDeque::new()),
            max_group_size: max_group_size.max(1),
            max_in_flight,
            max_reserve,
            in_flight: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        })
    }
}

impl Scheduler for GroupScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        self.queued.load(Ordering::Relaxed) > 0
            && self.in_flight.load(Ordering::Relaxed) < self.max_in_flight
    }

    fn get_task(&self) -> Option<Arc<Task>> {
        let mut groups = self.groups.lock();
        let front = groups.front_mut()?;
        let task = front.tasks.pop_front()?;
        if front.tasks.is_empty() {
            groups.pop_front();
        }
        self.queued.fetch_sub(1, Ordering::Relaxed);
        Some(task)
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

    fn command_finish(&self, _task: &Arc<Task>) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    fn queue_task(&self, task: Arc<Task>) {
        let mut groups = self.groups.lock();
        let chunk_id = task.chunk_id;
        let coalesces = groups
            .back()
            .map(|g| g.chunk_id == chunk_id && g.tasks.len() < self.max_group_size)
            .unwrap_or(false);
        if coalesces {
            groups.back_mut().unwrap().tasks.push_back(task);
        } else {
            let mut tasks = VecDeque::new();
            tasks.push_back(task);
            groups.push_back(Group { chunk_id, tasks });
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TaskMsg;
    use crate::worker::task::TaskId;

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

    #[test]
    fn successive_same_chunk_tasks_coalesce_into_one_group() {
        let sched = GroupScheduler::new("group", 4, 4, 2);
        sched.queue_task(task(1, 5));
        sched.queue_task(task(2, 5));
        sched.queue_task(task(3, 5));
        // All three dispatch in arrival order, as a single coalesced run.
        assert_eq!(sched.get_task().unwrap().id.job_id, 1);
        assert_eq!(sched.get_task().unwrap().id.job_id, 2);
        assert_eq!(sched.get_task().unwrap().id.job_id, 3);
    }

    #[test]
    fn exhausted_group_starts_a_fresh_group_at_the_tail() {
        let sched = GroupScheduler::new("group", 2, 4, 2);
        sched.queue_task(task(1, 5));
        sched.queue_task(task(2, 5));
        // Group for chunk 5 is now at max_group_size=2; a third task for the
        // same chunk starts a new group rather than growing this one.
        sched.queue_task(task(3, 5));
        sched.queue_task(task(4, 7));

        assert_eq!(sched.get_task().unwrap().id.job_id, 1);
        assert_eq!(sched.get_task().unwrap().id.job_id, 2);
        assert_eq!(sched.get_task().unwrap().id.job_id, 3);
        assert_eq!(sched.get_task().unwrap().id.job_id, 4);
    }

    #[test]
    fn ready_respects_max_in_flight() {
        let sched = GroupScheduler::new("group", 4, 1, 2);
        sched.queue_task(task(1, 1));
        assert!(sched.ready());
        let t = sched.get_task().unwrap();
        sched.command_start(&t);
        assert_eq!(sched.in_flight(), 1);
        sched.queue_task(task(2, 1));
        assert!(!sched.ready(), "in_flight already at max_in_flight");
    }
}
