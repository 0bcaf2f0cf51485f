//! Response Handler protocol state machine (spec.md §4.7) and the Infile
//! Merger it drives (spec.md §2, §6.3). Grounded on
//! `examples/original_source/core/modules/ccontrol/MergingHandler.cc`: the
//! state names, the `flush`/`reset`/`finished` method names, and the
//! `_flushed`-guards-`reset` rule all come directly from that file.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{FabricError, Result};
use crate::proto::frame::{md5_of, Body, Header, HEADER_FRAME_SIZE};

/// Protocol state, one per Job's Response Handler (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgState {
    HeaderSizeWait,
    ResultWait,
    ResultRecv,
    ResultExtra,
    HeaderErr,
    ResultErr,
}

impl MsgState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MsgState::HeaderErr | MsgState::ResultErr | MsgState::ResultRecv)
    }
}

/// A latched protocol/merge error: code + message, surfaced through the
/// Job's status update (spec.md §7).
#[derive(Debug, Clone)]
pub struct LatchedError {
    pub error: FabricError,
}

/// Consumes a record batch and appends it to a named result table.
/// `append` is idempotent on `(query_id, chunk_id, fragment_id, seq)`: `seq`
/// is the Response Handler's per-frame counter, so distinct continuation
/// frames of the same fragment (spec.md §8 scenario 2) are merged once each,
/// while a true network-level re-delivery of the same frame is suppressed
/// (spec.md §6.3).
pub trait Merger: Send + Sync {
    fn append(&self, query_id: u64, chunk_id: i32, fragment_id: i32, seq: u32, body: &Body) -> Result<()>;
}

/// A minimal in-memory result table: rows keyed by the idempotency tuple so
/// repeated appends of the same frame are no-ops.
#[derive(Default)]
pub struct InfileMerger {
    applied: Mutex<HashSet<(u64, i32, i32, u32)>>,
    rows: Mutex<Vec<Vec<u8>>>,
}

impl InfileMerger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }
}

impl Merger for InfileMerger {
    fn append(&self, query_id: u64, chunk_id: i32, fragment_id: i32, seq: u32, body: &Body) -> Result<()> {
        let key = (query_id, chunk_id, fragment_id, seq);
        let mut applied = self.applied.lock();
        if applied.contains(&key) {
            debug!(query_id, chunk_id, fragment_id, seq, "duplicate append suppressed");
            return Ok(());
        }
        self.rows.lock().extend(body.rows.iter().cloned());
        applied.insert(key);
        Ok(())
    }
}

/// Per-Job protocol state machine. Owns the receive buffer; the Stream
/// Request fills it in place and then calls [`ResponseHandler::flush`].
pub struct ResponseHandler {
    state: MsgState,
    buffer: Vec<u8>,
    worker_name: Option<String>,
    current_header: Option<Header>,
    latched_error: Option<LatchedError>,
    flushed: bool,
    merger: Arc<dyn Merger>,
    query_id: u64,
    chunk_id: i32,
    fragment_id: i32,
    next_seq: u32,
}

impl ResponseHandler {
    pub fn new(merger: Arc<dyn Merger>, query_id: u64, chunk_id: i32, fragment_id: i32) -> Self {
        Self {
            state: MsgState::HeaderSizeWait,
            buffer: vec![0u8; HEADER_FRAME_SIZE],
            worker_name: None,
            current_header: None,
            latched_error: None,
            flushed: false,
            merger,
            query_id,
            chunk_id,
            fragment_id,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> MsgState {
        self.state
    }

    pub fn worker_name(&self) -> Option<&str> {
        self.worker_name.as_deref()
    }

    /// The Stream Request fills this buffer in place; between `flush` calls
    /// its length is exactly the number of bytes the Stream Request should
    /// deliver next (HANDLER-FRAMING, spec.md §8).
    pub fn next_buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn latched_error(&self) -> Option<&FabricError> {
        self.latched_error.as_ref().map(|e| &e.error)
    }

    /// Whether the merger has been invoked at least once. Once true,
    /// `reset()` is forbidden (JOB-RETRY-SAFETY, spec.md §8).
    pub fn finished(&self) -> bool {
        self.flushed
    }

    fn latch(&mut self, err: FabricError) {
        error!(query_id = self.query_id, chunk_id = self.chunk_id, error = %err, "response handler latched error");
        self.latched_error = Some(LatchedError { error: err });
    }

    /// Externally-originated error (e.g. a provisioning failure that never
    /// reached the wire), mirroring `errorFlush` in the source.
    pub fn error_flush(&mut self, err: FabricError) {
        self.latch(err.clone());
        self.state = MsgState::ResultErr;
    }

    /// Attempt to reset to a fresh state for a retry. Refused once any body
    /// has been merged (partial-merge rollback is not supported, spec.md
    /// §4.7).
    pub fn reset(&mut self) -> bool {
        if self.flushed {
            return false;
        }
        self.state = MsgState::HeaderSizeWait;
        self.buffer = vec![0u8; HEADER_FRAME_SIZE];
        self.worker_name = None;
        self.current_header = None;
        self.latched_error = None;
        self.next_seq = 0;
        true
    }

    /// Drive one transition after the Stream Request has filled
    /// `next_buffer()`. Returns `Ok(true)` when this flush completed the
    /// stream (`last=true`), `Ok(false)` when more frames are expected, or
    /// `Err` with the latched error when the state machine has failed.
    pub fn flush(&mut self) -> Result<bool> {
        match self.state {
            MsgState::HeaderSizeWait => self.flush_header_size_wait(),
            MsgState::ResultWait => self.flush_result_wait(),
            MsgState::ResultExtra => self.flush_result_extra(),
            MsgState::ResultRecv => {
                // Unreachable under a correct worker (spec.md §9 open
                // question (a)); preserved as a defensive error path, not a
                // retry target.
                let err = FabricError::ResultError("unexpected bytes after RESULT_RECV".to_string());
                self.latch(err.clone());
                self.state = MsgState::ResultErr;
                Err(err)
            }
            MsgState::HeaderErr | MsgState::ResultErr => {
                Err(self.latched_error.as_ref().map(|e| e.error.clone()).unwrap_or(FabricError::ResultError(
                    "flush called on terminal state with no latched error".to_string(),
                )))
            }
        }
    }

    fn flush_header_size_wait(&mut self) -> Result<bool> {
        match Header::decode(&self.buffer) {
            Ok(header) => {
                if self.worker_name.is_none() {
                    self.worker_name = Some(header.worker_name.clone());
                }
                self.buffer = vec![0u8; header.body_size as usize];
                self.current_header = Some(header);
                self.state = MsgState::ResultWait;
                Ok(false)
            }
            Err(_) => {
                let err = FabricError::ResultDecode("failed to decode header frame".to_string());
                self.latch(err.clone());
                self.state = MsgState::HeaderErr;
                Err(err)
            }
        }
    }

    fn flush_result_extra(&mut self) -> Result<bool> {
        match Header::decode(&self.buffer) {
            Ok(header) => {
                self.buffer = vec![0u8; header.body_size as usize];
                self.current_header = Some(header);
                self.state = MsgState::ResultWait;
                Ok(false)
            }
            Err(_) => {
                let err = FabricError::ResultDecode("failed to decode continuation header".to_string());
                self.latch(err.clone());
                self.state = MsgState::HeaderErr;
                Err(err)
            }
        }
    }

    fn flush_result_wait(&mut self) -> Result<bool> {
        let header = self
            .current_header
            .clone()
            .expect("RESULT_WAIT is only entered after a header decodes");

        // Integrity first: MD5 is verified against the bytes exactly as
        // delivered, before any interpretation (HANDLER-INTEGRITY, spec.md §8).
        let computed = md5_of(&self.buffer);
        if computed != header.md5 {
            let err = FabricError::ResultMd5(format!(
                "computed md5 {computed:02x?} does not match header md5 {:02x?}",
                header.md5
            ));
            self.latch(err.clone());
            self.state = MsgState::ResultErr;
            return Err(err);
        }

        let body = match Body::decode(&self.buffer) {
            Ok(body) => body,
            Err(_) => {
                let err = FabricError::ResultDecode("failed to decode body".to_string());
                self.latch(err.clone());
                self.state = MsgState::HeaderErr;
                return Err(err);
            }
        };

        let seq = self.next_seq;
        if let Err(merge_err) = self
            .merger
            .append(self.query_id, self.chunk_id, self.fragment_id, seq, &body)
        {
            let err = FabricError::MergeError(merge_err.to_string());
            self.latch(err.clone());
            self.state = MsgState::ResultErr;
            return Err(err);
        }
        self.next_seq += 1;
        self.flushed = true;

        if body.continues {
            self.state = MsgState::ResultExtra;
            self.buffer = vec![0u8; HEADER_FRAME_SIZE];
            Ok(false)
        } else {
            self.state = MsgState::ResultRecv;
            self.buffer.clear();
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::runner::build_frame;

    fn push_frame(handler: &mut ResponseHandler, frame: [u8; HEADER_FRAME_SIZE], body: Vec<u8>) -> Result<bool> {
        *handler.next_buffer() = frame.to_vec();
        handler.flush()?;
        *handler.next_buffer() = body;
        handler.flush()
    }

    #[test]
    fn single_frame_success_merges_once_and_reports_last() {
        let merger = InfileMerger::new();
        let mut handler = ResponseHandler::new(merger.clone(), 1, 7, 0);
        let (frame, body) = build_frame("worker-a", vec![b"row".to_vec()], false).unwrap();

        let last = push_frame(&mut handler, frame, body).unwrap();

        assert!(last);
        assert_eq!(handler.state(), MsgState::ResultRecv);
        assert!(handler.finished());
        assert_eq!(merger.row_count(), 1);
    }

    #[test]
    fn multi_frame_success_merges_twice() {
        let merger = InfileMerger::new();
        let mut handler = ResponseHandler::new(merger.clone(), 1, 7, 0);

        let (frame1, body1) = build_frame("worker-a", vec![b"row1".to_vec()], true).unwrap();
        let not_last = push_frame(&mut handler, frame1, body1).unwrap();
        assert!(!not_last);
        assert_eq!(handler.state(), MsgState::ResultWait);

        let (frame2, body2) = build_frame("worker-a", vec![b"row2".to_vec()], false).unwrap();
        let last = push_frame(&mut handler, frame2, body2).unwrap();
        assert!(last);
        assert_eq!(merger.row_count(), 2);
    }

    #[test]
    fn md5_mismatch_never_invokes_merger() {
        let merger = InfileMerger::new();
        let mut handler = ResponseHandler::new(merger.clone(), 1, 7, 0);
        let (frame, mut body) = build_frame("worker-a", vec![b"row".to_vec()], false).unwrap();
        body[0] ^= 0xFF; // tamper with the body after the header's md5 was computed.

        *handler.next_buffer() = frame.to_vec();
        handler.flush().unwrap();
        *handler.next_buffer() = body;
        let err = handler.flush().unwrap_err();

        assert!(matches!(err, FabricError::ResultMd5(_)));
        assert_eq!(handler.state(), MsgState::ResultErr);
        assert_eq!(merger.row_count(), 0);
    }

    #[test]
    fn reset_is_forbidden_once_flushed() {
        let merger = InfileMerger::new();
        let mut handler = ResponseHandler::new(merger, 1, 7, 0);
        let (frame, body) = build_frame("worker-a", vec![b"row".to_vec()], false).unwrap();
        push_frame(&mut handler, frame, body).unwrap();
        assert!(!handler.reset());
    }

    #[test]
    fn reset_succeeds_before_any_merge() {
        let merger = InfileMerger::new();
        let mut handler = ResponseHandler::new(merger, 1, 7, 0);
        assert!(handler.reset());
        assert_eq!(handler.state(), MsgState::HeaderSizeWait);
    }

    #[test]
    fn duplicate_append_of_the_same_frame_is_idempotent() {
        let merger = InfileMerger::new();
        let body = Body {
            rows: vec![b"row".to_vec()],
            continues: false,
        };
        merger.append(1, 1, 0, 0, &body).unwrap();
        merger.append(1, 1, 0, 0, &body).unwrap();
        assert_eq!(merger.row_count(), 1);
    }

    #[test]
    fn distinct_sequence_numbers_both_merge() {
        let merger = InfileMerger::new();
        let body = Body {
            rows: vec![b"row".to_vec()],
            continues: false,
        };
        merger.append(1, 1, 0, 0, &body).unwrap();
        merger.append(1, 1, 0, 1, &body).unwrap();
        assert_eq!(merger.row_count(), 2);
    }
}
