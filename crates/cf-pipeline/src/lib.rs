//! # cf-pipeline
//!
//! Execution of single-step and combined media tasks.
//!
//! This crate provides:
//!
//! - **[`Processor`]** trait -- one operation type with pure validation and
//!   async execution.
//! - **Built-in processors** ([`processors`]) -- join, audio overlay, text
//!   overlay, subtitles and video overlay, backed by `cf-av`.
//! - **[`ProcessorRegistry`]** -- lookup table from operation type to
//!   processor.
//! - **[`RunContext`]** -- explicit per-run state: task and worker identity,
//!   cancellation, progress sink and the artifact arena.
//! - **Result cache keying** ([`cache`]) -- canonical content-addressed keys
//!   and the [`ResultCache`] trait.
//! - **Object storage** ([`storage`]) -- the [`ObjectStore`] trait and a local
//!   filesystem implementation.
//! - **[`PipelineExecutor`]** -- validates every step up front, consults the
//!   cache, runs uncached steps, and rolls back intermediate artifacts on
//!   failure or cancellation.

pub mod cache;
pub mod context;
pub mod executor;
pub mod processor;
pub mod processors;
pub mod registry;
pub mod storage;

// Re-export key types at the crate root.
pub use cache::{CacheKey, CachedResult, MemoryResultCache, ResultCache};
pub use context::{ArtifactArena, ProgressSender, RunContext, StepContext};
pub use executor::{PipelineExecutor, PipelineOutcome, PipelinePlan, StepReport};
pub use processor::Processor;
pub use registry::ProcessorRegistry;
pub use storage::{LocalStore, ObjectStore};
