//! Query Runner (spec.md §4.6). Executes a [`Task`] against the local
//! relational engine — an out-of-scope collaborator (spec.md §1) modeled
//! here as the [`Engine`] trait so the runner is unit-testable without one,
//! in the spirit of `TaskQueryRunner` in
//! `examples/original_source/core/modules/wbase/Task.h`.

use crate::error::{FabricError, Result};
use crate::proto::frame::{Body, Header};
use crate::worker::task::Task;

/// The local relational engine. A real implementation opens a connection
/// (retrying on transient connect errors), selects the database context, and
/// returns row batches for a SQL string.
pub trait Engine: Send + Sync {
    fn run_query(&self, db: &str, sql: &str) -> Result<Vec<RowBatch>>;
}

pub struct RowBatch {
    pub rows: Vec<Vec<u8>>,
}

/// Destination for framed results; a real implementation hands bytes to the
/// worker's send channel over the transport (spec.md §4.6 step 5).
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, header_frame: [u8; crate::proto::frame::HEADER_FRAME_SIZE], body: Vec<u8>) -> Result<()>;
}

/// Batch size cap per frame (spec.md §4.6: "bounded batches").
const MAX_ROWS_PER_BATCH: usize = 4096;

/// Run every fragment's queries against `engine`, handing each composed
/// frame to `sink`. Cancellation is polled between fragments/batches, the
/// cooperative suspension point named in spec.md §4.5/§5 — already-emitted
/// frames are delivered fully. The final frame overall is marked
/// `continues = false` (spec.md §4.6 step 6); every other frame is marked
/// `continues = true`.
pub fn run(task: &Task, engine: &dyn Engine, sink: &dyn FrameSink) -> Result<()> {
    for (fi, fragment) in task.msg.fragments.iter().enumerate() {
        if task.is_cancelled() {
            return Ok(());
        }
        let is_last_fragment = fi + 1 == task.msg.fragments.len();
        for (qi, sql) in fragment.queries.iter().enumerate() {
            if task.is_cancelled() {
                return Ok(());
            }
            let is_last_query = is_last_fragment && qi + 1 == fragment.queries.len();
            let batches = engine.run_query(&task.msg.db, sql)?;
            let batch_count = batches.len();
            for (bi, batch) in batches.into_iter().enumerate() {
                if task.is_cancelled() {
                    return Ok(());
                }
                let is_last_batch = is_last_query && bi + 1 == batch_count;
                let chunks: Vec<Vec<Vec<u8>>> = batch
                    .rows
                    .chunks(MAX_ROWS_PER_BATCH)
                    .map(|c| c.to_vec())
                    .collect();
                let chunk_count = chunks.len();
                for (ci, chunk) in chunks.into_iter().enumerate() {
                    if task.is_cancelled() {
                        return Ok(());
                    }
                    let is_last_chunk = is_last_batch && ci + 1 == chunk_count;
                    let (frame, body) = build_frame("worker", chunk, !is_last_chunk)?;
                    sink.send_frame(frame, body)?;
                }
            }
        }
    }
    Ok(())
}

/// Compose one frame: header + body, per §6.1.
pub fn build_frame(
    worker_name: &str,
    rows: Vec<Vec<u8>>,
    continues: bool,
) -> Result<([u8; crate::proto::frame::HEADER_FRAME_SIZE], Vec<u8>)> {
    let body = Body { rows, continues };
    let body_bytes = body.encode()?;
    if body_bytes.len() > u32::MAX as usize {
        return Err(FabricError::ResultError("body too large to frame".to_string()));
    }
    let header = Header::new(worker_name, body_bytes.len() as u32, &body_bytes, continues);
    let frame = header.encode()?;
    Ok((frame, body_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TaskMsg;
    use crate::worker::task::TaskId;
    use parking_lot::Mutex;

    struct FakeEngine;
    impl Engine for FakeEngine {
        fn run_query(&self, _db: &str, _sql: &str) -> Result<Vec<RowBatch>> {
            Ok(vec![RowBatch {
                rows: vec![b"row".to_vec()],
            }])
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        continues: Mutex<Vec<bool>>,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, header_frame: [u8; crate::proto::frame::HEADER_FRAME_SIZE], _body: Vec<u8>) -> Result<()> {
            let header = Header::decode(&header_frame)?;
            self.continues.lock().push(header.continues);
            Ok(())
        }
    }

    fn task_with_queries(queries: Vec<&str>) -> std::sync::Arc<Task> {
        Task::new(
            TaskId { query_id: 1, job_id: 1 },
            TaskMsg {
                session_id: 1,
                chunk_id: 1,
                db: "db".into(),
                scan_priority: None,
                scan_tables: vec![],
                fragments: vec![crate::proto::Fragment {
                    queries: queries.into_iter().map(String::from).collect(),
                    subchunk_ids: None,
                    result_table: "r".into(),
                }],
            },
        )
    }

    #[test]
    fn cancelled_task_short_circuits_without_error() {
        let task = task_with_queries(vec!["SELECT 1"]);
        task.cancel();
        let sink = RecordingSink::default();
        assert!(run(&task, &FakeEngine, &sink).is_ok());
        assert!(sink.continues.lock().is_empty());
    }

    #[test]
    fn only_the_final_frame_is_marked_not_continuing() {
        let task = task_with_queries(vec!["SELECT 1", "SELECT 2"]);
        let sink = RecordingSink::default();
        run(&task, &FakeEngine, &sink).unwrap();

        let continues = sink.continues.lock();
        assert_eq!(continues.len(), 2);
        assert!(continues[0], "first frame must signal more to come");
        assert!(!continues[1], "last frame must signal completion");
    }

    #[test]
    fn build_frame_round_trips_through_header_and_body_decode() {
        let (frame, body_bytes) = build_frame("w1", vec![b"a".to_vec()], false).unwrap();
        let header = Header::decode(&frame).unwrap();
        assert_eq!(header.body_size as usize, body_bytes.len());
        let body = Body::decode(&body_bytes).unwrap();
        assert_eq!(body.rows, vec![b"a".to_vec()]);
    }
}
