//! Stream Request: the per-Job callback object bound to the transport layer
//! (spec.md §3, §4.7). Grounded on
//! `examples/original_source/core/modules/qdisp/QueryRequest.cc`: the
//! self-keepalive reference (`_keepAlive`), the identity check in
//! `freeQueryResource` (is this callback still the current one for its
//! Job?), and the tri-state finish status all come from that file.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::czar::job::Job;
use crate::error::Result;

/// Outcome recorded once a Stream Request's work is done. Tri-state rather
/// than a bool so "finished but failed" and "finished successfully" are
/// distinguishable from "never finished" without an `Option<Result<()>>`
/// threaded through every caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
    Active,
    Success,
    Failed,
}

/// Bridges an outstanding network receive to its owning [`Job`]. Created
/// with `activate`, which stores a strong self-reference so the transport
/// layer (which only holds a `Weak` or raw callback pointer in spec terms)
/// cannot cause this object to be dropped mid-flight; `cleanup` releases it.
pub struct StreamRequest {
    job: Arc<Job>,
    keep_alive: Mutex<Option<Arc<StreamRequest>>>,
    finish_status: Mutex<FinishStatus>,
}

impl StreamRequest {
    pub fn new(job: Arc<Job>) -> Arc<Self> {
        Arc::new(Self {
            job,
            keep_alive: Mutex::new(None),
            finish_status: Mutex::new(FinishStatus::Active),
        })
    }

    /// Install the self-keepalive. Must be called with the same `Arc` this
    /// instance lives behind (mirrors `_keepAlive = shared_from_this()`).
    pub fn activate(self_arc: &Arc<Self>) {
        *self_arc.keep_alive.lock() = Some(self_arc.clone());
    }

    pub fn finish_status(&self) -> FinishStatus {
        *self.finish_status.lock()
    }

    /// Fill the Job's receive buffer with `bytes` and drive one state
    /// machine step. Returns `Ok(true)` once the Job's stream is complete.
    pub fn process_response_data(&self, bytes: &[u8]) -> Result<bool> {
        {
            let mut buf = self.job.next_buffer();
            buf.clear();
            buf.extend_from_slice(bytes);
        }
        let result = self.job.process_response_data();
        match &result {
            Ok(true) => {
                *self.finish_status.lock() = FinishStatus::Success;
                self.cleanup();
            }
            Err(_) => {
                *self.finish_status.lock() = FinishStatus::Failed;
                self.cleanup();
            }
            Ok(false) => {}
        }
        result
    }

    /// Release resources held for this request. Grounded on
    /// `freeQueryResource`'s identity check: a stale callback racing with a
    /// newer Stream Request for the same Job must not tear down the live
    /// one's state, so callers pass the `Arc` they believe is current and we
    /// compare identity with `self` rather than trusting the caller blindly.
    pub fn free_query_resource(&self, caller_believes_current: &Arc<StreamRequest>) -> bool {
        if !std::ptr::eq(caller_believes_current.as_ref(), self) {
            warn!("freeQueryResource called with a stale StreamRequest identity, ignoring");
            return false;
        }
        self.cleanup();
        true
    }

    fn cleanup(&self) {
        debug!("stream request cleanup, releasing keepalive");
        self.keep_alive.lock().take();
    }
}
