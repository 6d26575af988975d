//! Clipforge - media task orchestration engine
//!
//! This library crate wires the `cf-*` crates into a running system: the
//! shared [`AppContext`], the SQLite-backed result cache, the task service
//! used by callers, and the leased workers that execute pipelines.

pub mod cache;
pub mod context;
pub mod service;
pub mod worker;

pub use cache::SqliteResultCache;
pub use context::AppContext;
pub use service::{SubmitTask, TaskService};
pub use worker::{spawn_workers, Worker};
