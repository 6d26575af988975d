//! cf-db: database access and persistence layer.
//!
//! This crate provides SQLite-backed storage with connection pooling,
//! embedded migrations, typed models, and query modules for tasks, leases
//! and result-cache entries. It is the single source of truth for task state;
//! every status change goes through a compare-and-set in [`queries::tasks`].

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod timestamp;
