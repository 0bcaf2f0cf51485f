//! Worker process entry point: starts the Memory Manager, the Blend
//! Scheduler over its sub-schedulers, and the thread pool that drives them
//! (spec.md §4.4, §4.5).

use std::sync::Arc;

use queryfabric::error::Result;
use queryfabric::worker::pool::ThreadPool;
use queryfabric::worker::runner::{Engine, FrameSink, RowBatch};
use queryfabric::worker::sched::blend::BlendScheduler;
use queryfabric::worker::sched::group::GroupScheduler;
use queryfabric::worker::sched::scan::ScanScheduler;
use queryfabric::worker::sched::Scheduler;
use queryfabric::worker::memman::MemoryManager;
use queryfabric::config::WorkerConfig;
use tracing::info;

/// Placeholder for the out-of-scope relational engine collaborator
/// (spec.md §1). A real deployment wires in a connection to the local SQL
/// executor here.
struct NullEngine;

impl Engine for NullEngine {
    fn run_query(&self, _db: &str, _sql: &str) -> Result<Vec<RowBatch>> {
        Ok(Vec::new())
    }
}

/// Placeholder for the out-of-scope transport collaborator (spec.md §1). A
/// real deployment hands frames to the worker's send channel here.
struct NullFrameSink;

impl FrameSink for NullFrameSink {
    fn send_frame(&self, _header_frame: [u8; queryfabric::proto::frame::HEADER_FRAME_SIZE], _body: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// The worker's scheduling loop runs on plain OS threads (spec.md §5), so
/// only a small tokio runtime is needed here, to wait on ctrl-c the way the
/// teacher's `#[tokio::main]` entry points do.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).init();

    let cfg = WorkerConfig::default();
    info!(pool_size = cfg.pool_size, "starting worker");

    let memman = MemoryManager::new(cfg.memory_budget_bytes);
    let group: Arc<dyn Scheduler> = GroupScheduler::new(
        "group",
        cfg.group_max_group_size,
        cfg.group_max_in_flight,
        cfg.group_max_reserve,
    );
    let scans: Vec<Arc<dyn Scheduler>> = cfg
        .scan_classes
        .iter()
        .map(|sc| {
            ScanScheduler::new(
                sc.name.clone(),
                memman.clone(),
                sc.min_rating,
                sc.max_rating,
                sc.max_in_flight,
                sc.max_reserve,
            ) as Arc<dyn Scheduler>
        })
        .collect();

    let blend = BlendScheduler::new(cfg.pool_size, group, scans);
    let pool = ThreadPool::start(cfg.pool_size, blend, Arc::new(NullEngine), Arc::new(NullFrameSink));

    info!("worker running, press ctrl-c to stop");
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down worker");
    pool.shutdown();
    Ok(())
}
