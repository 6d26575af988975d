//! Per-run execution context.
//!
//! Everything a pipeline run needs is passed explicitly: task, run and worker
//! identity, the object store, the cancellation and abort tokens, the
//! progress sink and the artifact arena. Nothing is held in ambient state.

use std::path::PathBuf;
use std::sync::Arc;

use cf_core::{Error, Result, RunId, TaskId};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::storage::ObjectStore;

/// Sender for reporting overall task progress.
///
/// Wraps a callback that receives a progress percentage (0.0 -- 100.0) and
/// the name of the step producing it.
pub struct ProgressSender {
    callback: Box<dyn Fn(f64, &str) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    /// Report progress.
    pub fn send(&self, progress: f64, step: &str) {
        (self.callback)(progress, step);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Keeps overall progress monotonic across all steps of a run.
#[derive(Debug)]
struct ProgressTracker {
    sender: Arc<ProgressSender>,
    last: Mutex<f64>,
}

impl ProgressTracker {
    fn report(&self, overall: f64, step: &str) {
        if !overall.is_finite() {
            return;
        }
        let overall = overall.clamp(0.0, 100.0);
        {
            let mut last = self.last.lock();
            if overall < *last {
                return;
            }
            *last = overall;
        }
        self.sender.send(overall, step);
    }

    fn current(&self) -> f64 {
        *self.last.lock()
    }
}

/// Intermediate artifacts of one run, indexed by step position.
///
/// Owned by the run; nothing outside it reads or writes these references.
#[derive(Debug, Default)]
pub struct ArtifactArena {
    slots: Mutex<Vec<(usize, String)>>,
}

impl ArtifactArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record references produced by step `index`. Duplicates are ignored.
    pub fn register(&self, index: usize, references: impl IntoIterator<Item = String>) {
        let mut slots = self.slots.lock();
        for reference in references {
            if !slots.iter().any(|(_, r)| *r == reference) {
                slots.push((index, reference));
            }
        }
    }

    /// Snapshot of every registered artifact.
    pub fn entries(&self) -> Vec<(usize, String)> {
        self.slots.lock().clone()
    }

    /// References registered by step `index`.
    pub fn produced_by(&self, index: usize) -> Vec<String> {
        self.slots
            .lock()
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Remove and return every artifact not listed in `keep`.
    pub fn drain_except(&self, keep: &[String]) -> Vec<(usize, String)> {
        let mut slots = self.slots.lock();
        let (kept, drained): (Vec<_>, Vec<_>) = std::mem::take(&mut *slots)
            .into_iter()
            .partition(|(_, r)| keep.contains(r));
        *slots = kept;
        drained
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

/// Context for one pipeline run.
pub struct RunContext {
    pub task_id: TaskId,
    /// This attempt. Outputs are allocated under it, so a stale run of the
    /// same task never touches this run's files.
    pub run_id: RunId,
    pub worker_id: String,
    /// Storage collaborator for inputs, outputs and artifacts.
    pub store: Arc<dyn ObjectStore>,
    /// User cancellation. Checked only at step boundaries.
    pub cancellation: CancellationToken,
    /// Hard stop for in-flight tools (lease lost, shutdown).
    pub abort: CancellationToken,
    pub artifacts: ArtifactArena,
    progress: ProgressTracker,
}

impl RunContext {
    /// Create a new context with the minimum required fields.
    pub fn new(task_id: TaskId, worker_id: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            task_id,
            run_id: RunId::new(),
            worker_id: worker_id.into(),
            store,
            cancellation: CancellationToken::new(),
            abort: CancellationToken::new(),
            artifacts: ArtifactArena::new(),
            progress: ProgressTracker {
                sender: Arc::new(ProgressSender::noop()),
                last: Mutex::new(0.0),
            },
        }
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: attach an abort token.
    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = token;
        self
    }

    /// Builder: attach a progress sender.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress.sender = Arc::new(progress);
        self
    }

    /// Report overall progress. Values below the last report are dropped.
    pub fn report_progress(&self, overall: f64, step: &str) {
        self.progress.report(overall, step);
    }

    /// The highest overall progress reported so far.
    pub fn progress(&self) -> f64 {
        self.progress.current()
    }

    /// Whether a user asked for this run to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("task_id", &self.task_id)
            .field("run_id", &self.run_id)
            .field("worker_id", &self.worker_id)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// The view of a [`RunContext`] handed to a processor for one step.
///
/// Local progress in `[0, 100]` is mapped onto the step's window of the
/// overall progress, `[index/total*100, (index+1)/total*100]`.
pub struct StepContext<'a> {
    run: &'a RunContext,
    index: usize,
    total: usize,
    name: &'static str,
}

impl<'a> StepContext<'a> {
    pub fn new(run: &'a RunContext, index: usize, total: usize, name: &'static str) -> Self {
        Self {
            run,
            index,
            total: total.max(1),
            name,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.run.task_id
    }

    pub fn worker_id(&self) -> &str {
        &self.run.worker_id
    }

    /// Position of this step in the pipeline.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.run.store.as_ref()
    }

    /// Token that fires when in-flight work must stop at once.
    pub fn abort_token(&self) -> CancellationToken {
        self.run.abort.clone()
    }

    /// Overall progress equivalent to local progress `local` of this step.
    pub fn overall(&self, local: f64) -> f64 {
        let span = 100.0 / self.total as f64;
        self.index as f64 * span + span * local.clamp(0.0, 100.0) / 100.0
    }

    /// Report local progress of this step.
    pub fn report(&self, local: f64) {
        if local.is_finite() {
            self.run.report_progress(self.overall(local), self.name);
        }
    }

    /// Local path of an input, failing with `NotFound` if it is missing.
    pub fn resolve_input(&self, reference: &str) -> Result<PathBuf> {
        if !self.store().exists(reference)? {
            return Err(Error::not_found("artifact", reference));
        }
        self.store().local_path(reference)
    }

    /// Reserve an output reference for this step and register it with the
    /// run, so a failed step's partial output is cleaned up too.
    pub fn allocate_output(&self, extension: &str) -> Result<(String, PathBuf)> {
        let reference = self
            .store()
            .allocate(self.run.task_id, self.run.run_id, self.index, extension)?;
        self.run.artifacts.register(self.index, [reference.clone()]);
        let path = self.store().local_path(&reference)?;
        Ok((reference, path))
    }
}
