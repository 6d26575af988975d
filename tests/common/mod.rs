//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], a full [`AppContext`] backed by a temporary
//! SQLite file and a temporary object store, with fake processors registered
//! for every operation type. The fakes write small files instead of calling
//! ffmpeg and can be told to fail, wait, or run a hook mid-step.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use cf_av::ToolRegistry;
use cf_core::config::{Config, DatabaseConfig};
use cf_core::{Error, OperationType, Result, RunId, TaskId};
use cf_db::pool::{init_pool, DbPool, PooledConnection};
use cf_pipeline::{LocalStore, ObjectStore, Processor, ProcessorRegistry, StepContext};
use clipforge::{AppContext, TaskService, Worker};

pub const INPUT_A: &str = "inputs/a.mp4";
pub const INPUT_B: &str = "inputs/b.mp4";
pub const INPUT_MUSIC: &str = "inputs/music.mp3";

/// Code run inside a fake processor while its step executes.
pub type Hook = Arc<dyn Fn(&AppContext, TaskId) + Send + Sync>;

// ---------------------------------------------------------------------------
// RecordingStore
// ---------------------------------------------------------------------------

/// [`LocalStore`] that remembers every reference it allocated or deleted.
pub struct RecordingStore {
    inner: LocalStore,
    allocated: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalStore::new(root),
            allocated: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn allocated(&self) -> Vec<String> {
        self.allocated.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    /// Allocated references that still exist.
    pub fn remaining(&self) -> Vec<String> {
        self.allocated()
            .into_iter()
            .filter(|r| self.inner.exists(r).unwrap_or(false))
            .collect()
    }
}

impl ObjectStore for RecordingStore {
    fn exists(&self, reference: &str) -> Result<bool> {
        self.inner.exists(reference)
    }

    fn delete(&self, reference: &str) -> Result<()> {
        self.deleted.lock().push(reference.to_string());
        self.inner.delete(reference)
    }

    fn local_path(&self, reference: &str) -> Result<PathBuf> {
        self.inner.local_path(reference)
    }

    fn allocate(
        &self,
        task_id: TaskId,
        run_id: RunId,
        index: usize,
        extension: &str,
    ) -> Result<String> {
        let reference = self.inner.allocate(task_id, run_id, index, extension)?;
        self.allocated.lock().push(reference.clone());
        Ok(reference)
    }
}

// ---------------------------------------------------------------------------
// FakeProcessor
// ---------------------------------------------------------------------------

/// Stand-in for a real processor: checks its inputs exist and writes one
/// output file.
struct FakeProcessor {
    op: OperationType,
    fail: bool,
    hook: Option<Hook>,
    delay: Option<Duration>,
    executed: Arc<AtomicUsize>,
    app: Arc<OnceLock<AppContext>>,
}

#[async_trait]
impl Processor for FakeProcessor {
    fn operation(&self) -> OperationType {
        self.op
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<()> {
        if config.get("invalid").is_some() {
            return Err(Error::Validation(format!("{} config rejected", self.op)));
        }
        Ok(())
    }

    fn validate_inputs(&self, inputs: &[String], _config: &serde_json::Value) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::Validation(format!("{} needs inputs", self.op)));
        }
        Ok(())
    }

    async fn execute(
        &self,
        inputs: &[String],
        _config: &serde_json::Value,
        ctx: &StepContext<'_>,
    ) -> Result<Vec<String>> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        for input in inputs {
            ctx.resolve_input(input)?;
        }

        let (reference, path) = ctx.allocate_output("mp4")?;
        std::fs::write(&path, format!("{} of {inputs:?}", self.op))?;
        ctx.report(50.0);

        if let (Some(hook), Some(app)) = (&self.hook, self.app.get()) {
            hook(app, ctx.task_id());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::tool("ffmpeg", format!("{} exploded", self.op)));
        }
        Ok(vec![reference])
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub store: Arc<RecordingStore>,
    /// Number of fake processor executions across all operations.
    pub executed: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new harness with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: Config::default(),
            failing: Vec::new(),
            hooks: Vec::new(),
            delays: Vec::new(),
        }
    }

    pub fn service(&self) -> TaskService {
        self.ctx.service()
    }

    pub fn worker(&self, id: &str) -> Worker {
        Worker::new(self.ctx.clone(), id)
    }

    /// Let worker `id` lease and process one task.
    pub async fn run_once(&self, id: &str) -> bool {
        self.worker(id)
            .process_next(&CancellationToken::new())
            .await
            .expect("worker failed")
    }

    /// Get a database connection from the pool.
    pub fn conn(&self) -> PooledConnection {
        cf_db::pool::get_conn(&self.db).expect("failed to get db connection")
    }

    pub fn executions(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

pub struct HarnessBuilder {
    config: Config,
    failing: Vec<OperationType>,
    hooks: Vec<(OperationType, Hook)>,
    delays: Vec<(OperationType, Duration)>,
}

impl HarnessBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Make every execution of `op` fail after writing its output.
    pub fn fail(mut self, op: OperationType) -> Self {
        self.failing.push(op);
        self
    }

    pub fn hook(
        mut self,
        op: OperationType,
        hook: impl Fn(&AppContext, TaskId) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.push((op, Arc::new(hook)));
        self
    }

    /// Make `op` take at least `delay` to execute.
    pub fn delay(mut self, op: OperationType, delay: Duration) -> Self {
        self.delays.push((op, delay));
        self
    }

    pub fn build(self) -> TestHarness {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db = init_pool(&DatabaseConfig {
            path: dir.path().join("clipforge.db"),
            ..Default::default()
        })
        .expect("failed to create pool");

        let media = dir.path().join("media");
        std::fs::create_dir_all(media.join("inputs")).expect("failed to create inputs dir");
        for input in [INPUT_A, INPUT_B, INPUT_MUSIC] {
            std::fs::write(media.join(input), b"media").expect("failed to write input");
        }
        let store = Arc::new(RecordingStore::new(&media));

        let executed = Arc::new(AtomicUsize::new(0));
        let app = Arc::new(OnceLock::new());
        let mut registry = ProcessorRegistry::new();
        for op in OperationType::ALL {
            registry.register(Arc::new(FakeProcessor {
                op,
                fail: self.failing.contains(&op),
                hook: self
                    .hooks
                    .iter()
                    .find(|(o, _)| *o == op)
                    .map(|(_, h)| h.clone()),
                delay: self
                    .delays
                    .iter()
                    .find(|(o, _)| *o == op)
                    .map(|(_, d)| *d),
                executed: executed.clone(),
                app: app.clone(),
            }));
        }

        let object_store: Arc<dyn ObjectStore> = store.clone();
        let ctx = AppContext::with_parts(
            self.config,
            db.clone(),
            Arc::new(ToolRegistry::empty()),
            object_store,
            Arc::new(registry),
        );
        let _ = app.set(ctx.clone());

        TestHarness {
            ctx,
            db,
            store,
            executed,
            _dir: dir,
        }
    }
}
