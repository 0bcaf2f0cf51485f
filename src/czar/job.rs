//! Job lifecycle, `JobStatus`, and retry policy (spec.md §4.8). Grounded on
//! `examples/original_source/core/modules/qdisp/JobQuery.cc`: the recursive
//! lock around status transitions, the cancel-before-provision race check,
//! and the retry-only-if-not-yet-merged rule all come from that file's
//! `runJob`/`cancel`/`provisioningFailed` methods.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use tracing::{info, warn};

use crate::czar::merge::{Merger, ResponseHandler};
use crate::error::{FabricError, Result};

/// Full status enum (SUPPLEMENTED FEATURES item 1): every state a Job can
/// report through the Executive's status surface, not just a collapsed
/// success/failure bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Provision,
    ProvisionNack,
    Request,
    ResponseReady,
    ResponseError,
    ResponseData,
    ResponseDataNack,
    ResponseDataError,
    ResponseDataErrorCorrupt,
    ResponseDataErrorOk,
    MergeError,
    Cancel,
    Complete,
}

pub struct JobId {
    pub query_id: u64,
    pub job_id: u32,
}

/// One outstanding Job: a single chunk's query dispatched to one worker.
///
/// Status transitions are guarded by a `ReentrantMutex` because
/// `process_response_data` and `cancel` can re-enter each other's call path
/// the way `JobQuery::cancel` and `QueryRequest::ProcessResponseData` do in
/// the source (a cancel arriving mid-merge must be able to observe and act
/// on the in-progress status without deadlocking against itself).
pub struct Job {
    pub id: JobId,
    pub chunk_id: i32,
    status: ReentrantMutex<RefCell<JobStatus>>,
    retry_count: AtomicU32,
    max_retries: u32,
    handler: parking_lot::Mutex<ResponseHandler>,
}

impl Job {
    pub fn new(id: JobId, chunk_id: i32, merger: Arc<dyn Merger>, max_retries: u32) -> Arc<Self> {
        let handler = ResponseHandler::new(merger, id.query_id, chunk_id, 0);
        Arc::new(Self {
            id,
            chunk_id,
            status: ReentrantMutex::new(RefCell::new(JobStatus::Provision)),
            retry_count: AtomicU32::new(0),
            max_retries,
            handler: parking_lot::Mutex::new(handler),
        })
    }

    pub fn status(&self) -> JobStatus {
        let guard = self.status.lock();
        *guard.borrow()
    }

    fn set_status(&self, status: JobStatus) {
        let guard = self.status.lock();
        *guard.borrow_mut() = status;
    }

    /// Whether this Job may still be retried: under the retry ceiling,
    /// nothing has been merged yet (JOB-RETRY-SAFETY, spec.md §8) — a
    /// partial merge cannot be rolled back, so once the handler has
    /// accepted one body frame a retry would double-count rows — and not
    /// cancelled. Cancellation is permanent (spec.md §4.8, §5: "a cancelled
    /// Job does not retry"), so a `ProvisionNack` arriving after cancel must
    /// not resurrect the Job.
    pub fn can_retry(&self) -> bool {
        self.status() != JobStatus::Cancel
            && self.retry_count.load(Ordering::SeqCst) < self.max_retries
            && !self.handler.lock().finished()
    }

    /// A worker refused to provision this Job's task (spec.md §7
    /// `ProvisionNack`). Returns `true` if a retry was scheduled.
    pub fn provision_nack(&self, reason: &str) -> bool {
        warn!(job = self.id.job_id, chunk = self.chunk_id, %reason, "provision nack");
        self.set_status(JobStatus::ProvisionNack);
        self.try_retry()
    }

    /// The worker accepted the task and a request is now outstanding.
    pub fn mark_requested(&self) {
        self.set_status(JobStatus::Request);
    }

    /// Feed one inbound buffer through the Response Handler's state machine.
    /// Returns `Ok(true)` once the stream for this Job is complete.
    pub fn process_response_data(&self) -> Result<bool> {
        self.set_status(JobStatus::ResponseData);
        let mut handler = self.handler.lock();
        match handler.flush() {
            Ok(last) => {
                if last {
                    drop(handler);
                    self.set_status(JobStatus::Complete);
                } else {
                    self.set_status(JobStatus::ResponseReady);
                }
                Ok(last)
            }
            Err(e) => {
                drop(handler);
                let status = match &e {
                    FabricError::ResultMd5(_) => JobStatus::ResponseDataErrorCorrupt,
                    FabricError::ResultDecode(_) => JobStatus::ResponseDataErrorCorrupt,
                    FabricError::MergeError(_) => JobStatus::MergeError,
                    _ => JobStatus::ResponseDataError,
                };
                self.set_status(status);
                Err(e)
            }
        }
    }

    /// Access to the handler's receive buffer, so a Stream Request can fill
    /// it before calling `process_response_data`.
    pub fn next_buffer(&self) -> parking_lot::MappedMutexGuard<'_, Vec<u8>> {
        parking_lot::MutexGuard::map(self.handler.lock(), |h| h.next_buffer())
    }

    pub fn cancel(&self) -> bool {
        let was_complete = matches!(self.status(), JobStatus::Complete | JobStatus::Cancel);
        self.set_status(JobStatus::Cancel);
        !was_complete
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status(),
            JobStatus::Complete | JobStatus::Cancel | JobStatus::MergeError
        )
    }

    fn try_retry(&self) -> bool {
        if !self.can_retry() {
            info!(job = self.id.job_id, chunk = self.chunk_id, "retry ceiling reached or already merged, giving up");
            self.set_status(JobStatus::ResponseDataError);
            return false;
        }
        self.retry_count.fetch_add(1, Ordering::SeqCst);
        let mut handler = self.handler.lock();
        handler.reset();
        drop(handler);
        self.set_status(JobStatus::Provision);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::czar::merge::InfileMerger;
    use crate::worker::runner::build_frame;

    fn job(max_retries: u32) -> Arc<Job> {
        Job::new(JobId { query_id: 1, job_id: 7 }, 3, InfileMerger::new(), max_retries)
    }

    #[test]
    fn provision_nack_retries_while_under_ceiling() {
        let job = job(2);
        assert!(job.provision_nack("connect refused"));
        assert_eq!(job.status(), JobStatus::Provision);
        assert!(job.provision_nack("connect refused"));
        assert!(!job.provision_nack("connect refused"));
        assert_eq!(job.status(), JobStatus::ResponseDataError);
    }

    #[test]
    fn cannot_retry_once_a_body_has_been_merged() {
        let job = job(5);
        let (frame, body) = build_frame("worker-a", vec![b"row".to_vec()], false).unwrap();
        *job.next_buffer() = frame.to_vec();
        job.process_response_data().unwrap();
        *job.next_buffer() = body;
        let last = job.process_response_data().unwrap();
        assert!(last);
        assert_eq!(job.status(), JobStatus::Complete);
        assert!(!job.can_retry());
    }

    #[test]
    fn cancel_is_idempotent_and_reports_whether_it_changed_anything() {
        let job = job(2);
        assert!(job.cancel());
        assert!(!job.cancel());
        assert_eq!(job.status(), JobStatus::Cancel);
    }
}
