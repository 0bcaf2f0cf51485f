//! Worker-side task scheduler and czar-side result-merging core for a
//! distributed shared-nothing SQL query execution fabric.
//!
//! This crate implements the two halves of the execution plane: [`worker`]
//! (memory residency, admission scheduling, the thread pool, the query
//! runner) and [`czar`] (the Executive/Job lifecycle and the Response
//! Handler protocol state machine that merges streamed results). The SQL
//! parser/rewriter, the KV metadata store, and the real relational engine
//! are out-of-scope external collaborators, represented here only as the
//! trait seams ([`worker::runner::Engine`], [`czar::merge::Merger`]) that a
//! full deployment plugs into.

pub mod config;
pub mod czar;
pub mod error;
pub mod proto;
pub mod worker;

pub use error::{FabricError, Result};
