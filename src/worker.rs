//! Leased task workers.
//!
//! A [`Worker`] polls the queue, leases one task at a time and hands it to the
//! pipeline executor. While the pipeline runs, a lease keeper renews the
//! lease in the background and relays cancellation requests. When the lease
//! is lost the worker drops the run, deletes the files of that run and
//! touches the task no further.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cf_core::events::EventPayload;
use cf_core::{Error, Result, TaskId, TaskStatus};
use cf_db::models::Task;
use cf_db::pool::{get_conn, DbPool};
use cf_db::queries::tasks::TransitionFields;
use cf_db::queries::{leases, tasks};
use cf_pipeline::{PipelineOutcome, PipelinePlan, ProgressSender, RunContext};

use crate::context::AppContext;

/// How a run ended from the worker's point of view.
enum RunEnd {
    Settled(Result<PipelineOutcome>),
    LeaseLost,
    Shutdown,
}

pub struct Worker {
    id: String,
    ctx: AppContext,
}

impl Worker {
    pub fn new(ctx: AppContext, id: impl Into<String>) -> Self {
        Self { id: id.into(), ctx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Poll for work until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(worker_id = %self.id, "Worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.process_next(&shutdown).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(worker_id = %self.id, "Worker error: {e}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ctx.config.queue.poll_interval()) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    /// Lease and process the next eligible task.
    ///
    /// Returns `Ok(true)` if a task was leased, `Ok(false)` if the queue was
    /// empty.
    pub async fn process_next(&self, shutdown: &CancellationToken) -> Result<bool> {
        let task = {
            let conn = get_conn(&self.ctx.db)?;
            leases::acquire(&conn, &self.id, self.ctx.config.queue.visibility_timeout())?
        };

        let Some(task) = task else {
            return Ok(false);
        };

        self.process(task, shutdown).await?;
        Ok(true)
    }

    async fn process(&self, task: Task, shutdown: &CancellationToken) -> Result<()> {
        let task_id = task.id;
        tracing::info!(
            task_id = %task_id,
            worker_id = %self.id,
            task_type = %task.task_type,
            "Processing task"
        );
        self.ctx.event_bus.broadcast(EventPayload::TaskStarted {
            task_id,
            worker_id: self.id.clone(),
        });

        let cancellation = CancellationToken::new();
        if task.cancel_requested {
            cancellation.cancel();
        }
        let abort = shutdown.child_token();
        let lease_lost = CancellationToken::new();
        let keeper = self.spawn_lease_keeper(task_id, cancellation.clone(), lease_lost.clone());

        let plan = self.plan(&task);
        let run = RunContext::new(task_id, self.id.clone(), self.ctx.store.clone())
            .with_cancellation(cancellation.clone())
            .with_abort(abort.clone())
            .with_progress(self.progress_sender(task_id, cancellation));

        let end = match plan {
            Err(e) => RunEnd::Settled(Err(e)),
            Ok(plan) => {
                let executor = self.ctx.executor();
                tokio::select! {
                    result = executor.run(&plan, &run) => RunEnd::Settled(result),
                    _ = lease_lost.cancelled() => RunEnd::LeaseLost,
                    _ = shutdown.cancelled() => RunEnd::Shutdown,
                }
            }
        };
        keeper.abort();

        match end {
            RunEnd::Settled(result) => self.finalize(&run, result),
            RunEnd::LeaseLost => {
                // Only this run's own files are removed; the task row now
                // belongs to the new lease holder.
                abort.cancel();
                tracing::warn!(
                    task_id = %task_id,
                    worker_id = %self.id,
                    run_id = %run.run_id,
                    "Lease lost; abandoning task"
                );
                discard_artifacts(&run);
                self.ctx.event_bus.broadcast(EventPayload::LeaseLost {
                    task_id,
                    worker_id: self.id.clone(),
                });
                Ok(())
            }
            RunEnd::Shutdown => {
                tracing::info!(
                    task_id = %task_id,
                    worker_id = %self.id,
                    "Shutting down; releasing task"
                );
                discard_artifacts(&run);
                let conn = get_conn(&self.ctx.db)?;
                leases::release(&conn, task_id, &self.id)?;
                Ok(())
            }
        }
    }

    fn plan(&self, task: &Task) -> Result<PipelinePlan> {
        let conn = get_conn(&self.ctx.db)?;
        let operations = tasks::get_operations(&conn, task.id)?;
        PipelinePlan::for_task(
            task.id,
            task.task_type,
            &task.config,
            &operations,
            &task.input_files,
        )
    }

    /// Settle the task and release the lease.
    ///
    /// Every transition is guarded by lease ownership, so a worker that lost
    /// its lease in the meantime changes nothing.
    fn finalize(&self, run: &RunContext, result: Result<PipelineOutcome>) -> Result<()> {
        let task_id = run.task_id;
        let lease_owner = Some(self.id.clone());

        let (to, fields, event) = match result {
            Ok(outcome) => {
                let payload = outcome.result_payload();
                match outcome {
                    PipelineOutcome::Completed { output_files, .. } => (
                        TaskStatus::Completed,
                        TransitionFields {
                            progress: Some(100.0),
                            output_files: Some(output_files),
                            result: Some(payload),
                            clear_error: true,
                            lease_owner,
                            ..Default::default()
                        },
                        EventPayload::TaskCompleted { task_id },
                    ),
                    PipelineOutcome::Failed { error, .. } => (
                        TaskStatus::Failed,
                        TransitionFields {
                            error_message: Some(error.to_string()),
                            result: Some(payload),
                            lease_owner,
                            ..Default::default()
                        },
                        EventPayload::TaskFailed {
                            task_id,
                            error: error.to_string(),
                        },
                    ),
                    PipelineOutcome::Cancelled { .. } => (
                        TaskStatus::Cancelled,
                        TransitionFields {
                            result: Some(payload),
                            lease_owner,
                            ..Default::default()
                        },
                        EventPayload::TaskCancelled { task_id },
                    ),
                }
            }
            Err(e) => (
                TaskStatus::Failed,
                TransitionFields {
                    error_message: Some(e.to_string()),
                    lease_owner,
                    ..Default::default()
                },
                EventPayload::TaskFailed {
                    task_id,
                    error: e.to_string(),
                },
            ),
        };

        let conn = get_conn(&self.ctx.db)?;
        match tasks::transition(&conn, task_id, &[TaskStatus::Processing], to, &fields) {
            Ok(task) => {
                match task.status {
                    TaskStatus::Failed => tracing::error!(
                        task_id = %task_id,
                        error = task.error_message.as_deref().unwrap_or_default(),
                        "Task failed"
                    ),
                    status => tracing::info!(task_id = %task_id, %status, "Task settled"),
                }
                self.ctx.event_bus.broadcast(event);
            }
            Err(e @ (Error::LeaseLost { .. } | Error::InvalidTransition { .. })) => {
                tracing::warn!(task_id = %task_id, worker_id = %self.id, "Discarding result: {e}");
                discard_artifacts(run);
            }
            Err(e) => return Err(e),
        }

        leases::release(&conn, task_id, &self.id)?;
        Ok(())
    }

    /// Progress sink for one run: records progress under the lease, marks
    /// the claim as started on the first report, and picks up cancellation
    /// requests.
    fn progress_sender(&self, task_id: TaskId, cancellation: CancellationToken) -> ProgressSender {
        let db = self.ctx.db.clone();
        let event_bus = self.ctx.event_bus.clone();
        let worker_id = self.id.clone();
        let started = AtomicBool::new(false);

        ProgressSender::new(move |pct, step| {
            let recorded = (|| -> Result<()> {
                let conn = get_conn(&db)?;
                if !started.swap(true, Ordering::SeqCst) {
                    leases::mark_started(&conn, task_id, &worker_id)?;
                }
                tasks::update_progress(&conn, task_id, pct, Some(&worker_id))?;
                if tasks::cancel_requested(&conn, task_id)? {
                    cancellation.cancel();
                }
                Ok(())
            })();
            if let Err(e) = recorded {
                tracing::warn!(task_id = %task_id, "Failed to record progress: {e}");
            }

            event_bus.broadcast(EventPayload::TaskProgress {
                task_id,
                progress: pct,
                step: step.to_string(),
            });
        })
    }

    fn spawn_lease_keeper(
        &self,
        task_id: TaskId,
        cancellation: CancellationToken,
        lease_lost: CancellationToken,
    ) -> JoinHandle<()> {
        keep_lease(
            self.ctx.db.clone(),
            task_id,
            self.id.clone(),
            self.ctx.config.queue.renew_interval(),
            self.ctx.config.queue.visibility_timeout(),
            cancellation,
            lease_lost,
        )
    }
}

/// Delete every file this run still owns. Cache hits from other tasks are
/// never registered with the run, so they are left alone.
fn discard_artifacts(run: &RunContext) {
    for (_, reference) in run.artifacts.drain_except(&[]) {
        if let Err(e) = run.store.delete(&reference) {
            tracing::warn!(task_id = %run.task_id, "Failed to delete artifact {reference}: {e}");
        }
    }
}

/// Renew a lease every `interval` until it is lost or the handle is aborted.
fn keep_lease(
    db: DbPool,
    task_id: TaskId,
    worker_id: String,
    interval: Duration,
    visibility_timeout: Duration,
    cancellation: CancellationToken,
    lease_lost: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; the lease is fresh.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let renewal = get_conn(&db)
                .and_then(|conn| leases::renew(&conn, task_id, &worker_id, visibility_timeout));

            match renewal {
                Ok(renewal) => {
                    tracing::trace!(
                        task_id = %task_id,
                        expires_at = %renewal.expires_at,
                        "Lease renewed"
                    );
                    if renewal.cancel_requested && !cancellation.is_cancelled() {
                        tracing::info!(task_id = %task_id, "Cancellation observed by lease keeper");
                        cancellation.cancel();
                    }
                }
                Err(e @ (Error::LeaseLost { .. } | Error::NotFound { .. })) => {
                    tracing::warn!(task_id = %task_id, worker_id = %worker_id, "{e}");
                    lease_lost.cancel();
                    break;
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, "Lease renewal failed: {e}");
                }
            }
        }
    })
}

/// Start `workers.count` workers named `<id_prefix>-<n>`.
pub fn spawn_workers(ctx: &AppContext, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let prefix = ctx.config.workers.id_prefix.clone();
    (1..=ctx.config.workers.count)
        .map(|n| {
            let worker = Worker::new(ctx.clone(), format!("{prefix}-{n}"));
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect()
}
