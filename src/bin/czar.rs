//! Czar process entry point: demonstrates wiring an Executive, dispatching
//! Jobs, and driving their Stream Requests as inbound bytes arrive
//! (spec.md §4.7, §4.8). The transport itself — accepting worker
//! connections and reading frames off a socket — is an external
//! collaborator outside this crate's scope (spec.md §1); this binary stops
//! at the point where a real event loop would call
//! `StreamRequest::process_response_data`.

use queryfabric::config::CzarConfig;
use queryfabric::czar::{Executive, InfileMerger, StreamRequest};
use queryfabric::error::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).init();

    let cfg = CzarConfig::default();
    info!(max_retries = cfg.max_retries, deadline_secs = cfg.query_deadline_secs, "starting czar");

    let merger = InfileMerger::new();
    let executive = Executive::new(1, merger, cfg);
    let _deadline = executive.spawn_deadline();

    let job = executive.add_job(0).expect("query not yet cancelled");
    let stream_request = StreamRequest::new(job.clone());
    StreamRequest::activate(&stream_request);

    info!("czar running; no transport is wired in this binary, exiting");
    let _ = stream_request.finish_status();
    Ok(())
}
