//! Executive / UserQuery: owns every [`Job`] dispatched for one user query,
//! fans out cancellation, and exposes a status surface keyed by job id
//! (spec.md §2 czar responsibilities, §6.3 operational surface). Grounded on
//! spec.md's own Executive description plus the teacher's
//! `pool/session_manager.rs` pattern of an `Arc<Self>`-owned registry behind
//! a `parking_lot::Mutex` with a `tokio` timer driving lifecycle events —
//! here a per-query deadline instead of session idle timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::CzarConfig;
use crate::czar::job::{Job, JobId, JobStatus};
use crate::czar::merge::Merger;

/// Owns the set of Jobs for one user query and the deadline that bounds it.
pub struct Executive {
    query_id: u64,
    cfg: CzarConfig,
    merger: Arc<dyn Merger>,
    jobs: Mutex<HashMap<u32, Arc<Job>>>,
    next_job_id: AtomicU32,
    cancelled: AtomicBool,
    /// Diagnostics message store, indexed in arrival order (spec.md §3,
    /// §6.3: "UserQuery owns a message store for diagnostics").
    messages: Mutex<Vec<(i32, String)>>,
}

impl Executive {
    pub fn new(query_id: u64, merger: Arc<dyn Merger>, cfg: CzarConfig) -> Arc<Self> {
        Arc::new(Self {
            query_id,
            cfg,
            merger,
            jobs: Mutex::new(HashMap::new()),
            next_job_id: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
        })
    }

    /// Append a diagnostics message, returning its index.
    pub fn add_message(&self, code: i32, message: impl Into<String>) -> usize {
        let mut messages = self.messages.lock();
        messages.push((code, message.into()));
        messages.len() - 1
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn message_at(&self, index: usize) -> Option<(i32, String)> {
        self.messages.lock().get(index).cloned()
    }

    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    /// Dispatch a new Job for `chunk_id`; refused once the query has been
    /// cancelled (spec.md §4.8: no new provisioning after cancel).
    pub fn add_job(&self, chunk_id: i32) -> Option<Arc<Job>> {
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let job = Job::new(
            JobId {
                query_id: self.query_id,
                job_id,
            },
            chunk_id,
            self.merger.clone(),
            self.cfg.max_retries,
        );
        self.jobs.lock().insert(job_id, job.clone());
        Some(job)
    }

    pub fn job(&self, job_id: u32) -> Option<Arc<Job>> {
        self.jobs.lock().get(&job_id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Status surface for operational inspection (spec.md §6.3).
    pub fn status_summary(&self) -> HashMap<u32, JobStatus> {
        self.jobs.lock().iter().map(|(id, job)| (*id, job.status())).collect()
    }

    pub fn is_done(&self) -> bool {
        self.jobs.lock().values().all(|job| job.is_finished())
    }

    /// Cancel every outstanding Job and block further provisioning.
    pub fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let jobs = self.jobs.lock();
        info!(query_id = self.query_id, job_count = jobs.len(), "cancelling user query");
        for job in jobs.values() {
            job.cancel();
        }
        drop(jobs);
        self.add_message(0, "query cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Spawn the deadline task: if the query is not done by
    /// `query_deadline_secs`, cancel it. A deadline of `0` disables this.
    pub fn spawn_deadline(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.cfg.query_deadline_secs == 0 {
            return None;
        }
        let exec = self.clone();
        let deadline = Duration::from_secs(self.cfg.query_deadline_secs);
        Some(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !exec.is_done() {
                warn!(query_id = exec.query_id, "query deadline exceeded, cancelling");
                exec.add_message(1, "query deadline exceeded");
                exec.cancel_all();
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::czar::merge::InfileMerger;

    fn executive(cfg: CzarConfig) -> Arc<Executive> {
        Executive::new(1, InfileMerger::new(), cfg)
    }

    #[test]
    fn add_job_assigns_increasing_ids() {
        let exec = executive(CzarConfig::default());
        let j1 = exec.add_job(10).unwrap();
        let j2 = exec.add_job(20).unwrap();
        assert_eq!(j1.id.job_id, 0);
        assert_eq!(j2.id.job_id, 1);
        assert_eq!(exec.job_count(), 2);
    }

    #[test]
    fn cancel_all_prevents_further_jobs_and_marks_existing_ones_cancelled() {
        let exec = executive(CzarConfig::default());
        let j1 = exec.add_job(10).unwrap();
        exec.cancel_all();
        assert!(exec.add_job(20).is_none());
        assert_eq!(j1.status(), JobStatus::Cancel);
    }

    #[test]
    fn is_done_reflects_every_job_finishing() {
        let exec = executive(CzarConfig::default());
        let j1 = exec.add_job(10).unwrap();
        assert!(!exec.is_done());
        j1.cancel();
        assert!(exec.is_done());
    }

    #[test]
    fn messages_are_indexed_in_arrival_order() {
        let exec = executive(CzarConfig::default());
        assert_eq!(exec.message_count(), 0);
        exec.add_message(42, "first");
        exec.add_message(7, "second");
        assert_eq!(exec.message_count(), 2);
        assert_eq!(exec.message_at(0), Some((42, "first".to_string())));
        assert_eq!(exec.message_at(1), Some((7, "second".to_string())));
        assert_eq!(exec.message_at(2), None);
    }

    #[test]
    fn cancel_all_records_a_diagnostic_message() {
        let exec = executive(CzarConfig::default());
        exec.add_job(10).unwrap();
        exec.cancel_all();
        assert_eq!(exec.message_count(), 1);
    }

    #[tokio::test]
    async fn deadline_cancels_an_unfinished_query() {
        let exec = executive(CzarConfig {
            max_retries: 2,
            query_deadline_secs: 1,
        });
        let _j1 = exec.add_job(10).unwrap();
        let handle = exec.spawn_deadline().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        handle.await.unwrap();
        assert!(exec.is_cancelled());
    }
}
