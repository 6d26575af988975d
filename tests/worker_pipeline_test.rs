//! Worker and pipeline integration tests.
//!
//! Each test submits tasks through the service, lets a [`Worker`] lease and
//! run them over fake processors, and checks the settled task, the artifacts
//! left in the object store, and the events on the bus.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use cf_core::config::Config;
use cf_core::events::EventPayload;
use cf_core::{Operation, OperationType, TaskId, TaskStatus, TaskType};
use cf_db::models::QueueStatus;
use cf_db::pool::get_conn;
use cf_db::queries::leases;
use cf_pipeline::ObjectStore;
use clipforge::SubmitTask;
use common::{TestHarness, INPUT_A, INPUT_B, INPUT_MUSIC};

fn inputs() -> Vec<String> {
    vec![INPUT_A.to_string(), INPUT_B.to_string()]
}

fn op(op_type: OperationType) -> Operation {
    Operation::new(op_type, json!({}))
}

fn pipeline(ops: &[OperationType]) -> SubmitTask {
    SubmitTask::new(TaskType::Combined, inputs())
        .with_operations(ops.iter().map(|o| op(*o)).collect())
}

/// Whether `reference` is the output of step `index` of some run of task `id`.
fn is_artifact(reference: &str, id: TaskId, index: usize) -> bool {
    reference.starts_with(&format!("tasks/{id}/"))
        && reference.ends_with(&format!("/step-{index:02}.mp4"))
}

fn progress_events(harness: &TestHarness, id: TaskId) -> Vec<f64> {
    harness
        .ctx
        .event_bus
        .history(id)
        .iter()
        .filter_map(|e| match e.payload {
            EventPayload::TaskProgress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect()
}

fn has_event(harness: &TestHarness, id: TaskId, pred: impl Fn(&EventPayload) -> bool) -> bool {
    harness.ctx.event_bus.history(id).iter().any(|e| pred(&e.payload))
}

// ---------------------------------------------------------------------------
// Successful runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_then_text_overlay_keeps_only_final_output() {
    let harness = TestHarness::new();
    let service = harness.service();

    let task = service
        .submit(
            SubmitTask::new(TaskType::Combined, inputs()).with_operations(vec![
                op(OperationType::Join),
                Operation::new(OperationType::TextOverlay, json!({ "text": "Hello" })),
            ]),
        )
        .unwrap();

    assert!(harness.run_once("w1").await);

    let done = service.get(task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100.0);
    assert!(done.completed_at.is_some());
    assert!(done.error_message.is_none());
    assert!(done.locked_by.is_none());

    assert_eq!(harness.executions(), 2);
    let allocated = harness.store.allocated();
    assert_eq!(allocated.len(), 2);
    assert!(is_artifact(&allocated[0], task.id, 0), "{allocated:?}");
    assert!(is_artifact(&allocated[1], task.id, 1), "{allocated:?}");
    assert_eq!(done.output_files, [allocated[1].clone()]);
    assert_eq!(harness.store.deleted(), [allocated[0].clone()]);
    assert_eq!(harness.store.remaining(), [allocated[1].clone()]);

    let result = done.result.unwrap();
    assert_eq!(result["cache_hits"], 0);
    assert_eq!(result["steps"].as_array().unwrap().len(), 2);
    assert_eq!(result["steps"][1]["operation"], "text_overlay");

    let progress = progress_events(&harness, task.id);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last().copied(), Some(100.0));

    assert!(has_event(&harness, task.id, |p| matches!(p, EventPayload::TaskCompleted { .. })));
    assert_eq!(harness.service().queue_status().unwrap(), QueueStatus::default());
}

#[tokio::test]
async fn single_step_task_runs_its_own_operation() {
    let harness = TestHarness::new();
    let service = harness.service();

    let task = service
        .submit(
            SubmitTask::new(
                TaskType::AudioOverlay,
                vec![INPUT_A.to_string(), INPUT_MUSIC.to_string()],
            )
            .with_config(json!({ "volume": 0.5 })),
        )
        .unwrap();
    assert!(harness.run_once("w1").await);

    let done = service.get(task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.output_files.len(), 1);
    assert!(is_artifact(&done.output_files[0], task.id, 0));
    assert_eq!(done.result.unwrap()["steps"][0]["operation"], "audio_overlay");
    assert!(harness.store.deleted().is_empty());
}

#[tokio::test]
async fn empty_queue_leases_nothing() {
    let harness = TestHarness::new();
    assert!(!harness.run_once("w1").await);
    assert_eq!(harness.executions(), 0);
}

// ---------------------------------------------------------------------------
// Failure and rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_at_last_step_rolls_back_every_artifact() {
    let harness = TestHarness::builder().fail(OperationType::VideoOverlay).build();
    let service = harness.service();

    let task = service
        .submit(pipeline(&[
            OperationType::Join,
            OperationType::TextOverlay,
            OperationType::AudioOverlay,
            OperationType::VideoOverlay,
        ]))
        .unwrap();
    assert!(harness.run_once("w1").await);

    let failed = service.get(task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.output_files.is_empty());
    // The processor's message is kept as raised; the step is in the result.
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Tool error [ffmpeg]: video_overlay exploded")
    );
    assert!(failed.locked_by.is_none());

    assert_eq!(harness.executions(), 4);
    assert_eq!(harness.store.allocated().len(), 4);
    assert!(harness.store.remaining().is_empty());

    let result = failed.result.unwrap();
    assert_eq!(result["steps"].as_array().unwrap().len(), 3);
    assert_eq!(result["failed_step"], json!({ "index": 3, "operation": "video_overlay" }));

    assert!(has_event(&harness, task.id, |p| matches!(p, EventPayload::TaskFailed { .. })));
    assert!(!has_event(&harness, task.id, |p| matches!(p, EventPayload::TaskCompleted { .. })));
}

#[tokio::test]
async fn missing_input_fails_task() {
    let harness = TestHarness::new();
    let service = harness.service();

    let task = service
        .submit(SubmitTask::new(
            TaskType::Join,
            vec![INPUT_A.to_string(), "inputs/missing.mp4".to_string()],
        ))
        .unwrap();
    assert!(harness.run_once("w1").await);

    let failed = service.get(task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("artifact not found: inputs/missing.mp4")
    );
    assert!(harness.store.allocated().is_empty());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_mid_pipeline_stops_at_next_step() {
    let harness = TestHarness::builder()
        .hook(OperationType::TextOverlay, |app, id| {
            let task = app.service().cancel(id).unwrap();
            assert_eq!(task.status, TaskStatus::Processing);
        })
        .build();
    let service = harness.service();

    let task = service
        .submit(pipeline(&[
            OperationType::Join,
            OperationType::TextOverlay,
            OperationType::VideoOverlay,
        ]))
        .unwrap();
    assert!(harness.run_once("w1").await);

    let cancelled = service.get(task.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(!cancelled.cancel_requested);
    assert!(cancelled.output_files.is_empty());
    assert!(cancelled.locked_by.is_none());

    // The video overlay step never ran.
    assert_eq!(harness.executions(), 2);
    assert!(harness.store.remaining().is_empty());

    assert!(has_event(&harness, task.id, |p| {
        matches!(p, EventPayload::TaskCancelRequested { .. })
    }));
    assert!(has_event(&harness, task.id, |p| matches!(p, EventPayload::TaskCancelled { .. })));
}

#[tokio::test]
async fn cancel_during_final_step_discards_output() {
    let harness = TestHarness::builder()
        .hook(OperationType::TextOverlay, |app, id| {
            app.service().cancel(id).unwrap();
        })
        .build();
    let service = harness.service();

    let task = service
        .submit(pipeline(&[OperationType::Join, OperationType::TextOverlay]))
        .unwrap();
    assert!(harness.run_once("w1").await);

    let cancelled = service.get(task.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(harness.executions(), 2);
    assert!(harness.store.remaining().is_empty());
}

// ---------------------------------------------------------------------------
// Result cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_step_is_served_from_cache() {
    let harness = TestHarness::new();
    let service = harness.service();

    // Same inputs in a different order hash to the same key.
    let first = service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
    let second = service
        .submit(SubmitTask::new(
            TaskType::Join,
            vec![INPUT_B.to_string(), INPUT_A.to_string()],
        ))
        .unwrap();

    assert!(harness.run_once("w1").await);
    assert!(harness.run_once("w1").await);

    assert_eq!(harness.executions(), 1);
    let first = service.get(first.id).unwrap();
    let second = service.get(second.id).unwrap();
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(second.output_files, first.output_files);

    let result = second.result.unwrap();
    assert_eq!(result["cache_hits"], 1);
    assert_eq!(result["steps"][0]["cached"], true);
}

#[tokio::test]
async fn stale_cache_entry_is_recomputed() {
    let harness = TestHarness::new();
    let service = harness.service();

    let first = service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
    assert!(harness.run_once("w1").await);

    let output = service.get(first.id).unwrap().output_files[0].clone();
    harness.store.delete(&output).unwrap();

    let second = service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
    assert!(harness.run_once("w1").await);

    assert_eq!(harness.executions(), 2);
    let second = service.get(second.id).unwrap();
    assert_eq!(second.output_files.len(), 1);
    assert!(is_artifact(&second.output_files[0], second.id, 0));
    assert_eq!(second.result.unwrap()["cache_hits"], 0);
}

#[tokio::test]
async fn disabled_cache_always_executes() {
    let mut config = Config::default();
    config.cache.enabled = false;
    let harness = TestHarness::builder().config(config).build();
    let service = harness.service();

    for _ in 0..2 {
        service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
        assert!(harness.run_once("w1").await);
    }
    assert_eq!(harness.executions(), 2);
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_status_separates_reserved_from_processing() {
    let seen: Arc<Mutex<Option<QueueStatus>>> = Arc::new(Mutex::new(None));
    let observed = seen.clone();
    let harness = TestHarness::builder()
        .hook(OperationType::Join, move |app, _| {
            *observed.lock() = Some(app.service().queue_status().unwrap());
        })
        .build();
    let service = harness.service();

    let reserved = service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
    let leased = leases::acquire(&harness.conn(), "idle", Duration::from_secs(60))
        .unwrap()
        .unwrap();
    assert_eq!(leased.id, reserved.id);

    let status = service.queue_status().unwrap();
    assert_eq!((status.pending, status.processing, status.reserved), (0, 0, 1));
    assert_eq!(status.workers, ["idle"]);

    service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
    assert!(harness.run_once("busy").await);

    let during = seen.lock().clone().unwrap();
    assert_eq!((during.pending, during.processing, during.reserved), (0, 1, 1));
    assert_eq!(during.total, 2);
    assert_eq!(during.workers, ["busy", "idle"]);
}

#[tokio::test]
async fn expired_lease_is_reclaimed_by_another_worker() {
    let harness = TestHarness::new();
    let service = harness.service();

    let task = service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
    leases::acquire(&harness.conn(), "crashed", Duration::ZERO)
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(service.queue_status().unwrap().pending, 1);
    assert!(harness.run_once("w2").await);

    let done = service.get(task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.output_files.len(), 1);
    assert!(is_artifact(&done.output_files[0], task.id, 0));
    assert!(has_event(&harness, task.id, |p| matches!(
        p,
        EventPayload::TaskStarted { worker_id, .. } if worker_id == "w2"
    )));
}

#[tokio::test]
async fn lost_lease_abandons_task_without_touching_it() {
    let mut config = Config::default();
    config.queue.renew_interval_secs = 1;
    let harness = TestHarness::builder()
        .config(config)
        .hook(OperationType::Join, |app, id| {
            let conn = get_conn(&app.db).unwrap();
            conn.execute(
                "UPDATE tasks SET locked_by = 'thief' WHERE id = ?1",
                [id.to_string()],
            )
            .unwrap();
        })
        .delay(OperationType::Join, Duration::from_secs(30))
        .build();
    let service = harness.service();

    let task = service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();
    let ran = tokio::time::timeout(Duration::from_secs(10), harness.run_once("w1"))
        .await
        .expect("worker did not notice the lost lease");
    assert!(ran);

    let task = service.get(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.locked_by.as_deref(), Some("thief"));

    // The abandoned run's own output is removed; the task row is untouched.
    let allocated = harness.store.allocated();
    assert_eq!(allocated.len(), 1);
    assert!(is_artifact(&allocated[0], task.id, 0));
    assert_eq!(harness.store.deleted(), allocated);
    assert!(harness.store.remaining().is_empty());

    assert!(has_event(&harness, task.id, |p| matches!(
        p,
        EventPayload::LeaseLost { worker_id, .. } if worker_id == "w1"
    )));
    assert!(!has_event(&harness, task.id, |p| matches!(
        p,
        EventPayload::TaskCompleted { .. } | EventPayload::TaskFailed { .. }
    )));
}

#[tokio::test]
async fn shutdown_releases_lease_and_cleans_up() {
    let harness = TestHarness::builder()
        .delay(OperationType::Join, Duration::from_secs(30))
        .build();
    let service = harness.service();

    let task = service.submit(SubmitTask::new(TaskType::Join, inputs())).unwrap();

    let shutdown = CancellationToken::new();
    let worker = harness.worker("w1");
    let stop = shutdown.clone();
    let handle = tokio::spawn(async move { worker.process_next(&stop).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.cancel();
    let ran = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker ignored shutdown")
        .unwrap()
        .unwrap();
    assert!(ran);

    let task = service.get(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert!(task.locked_by.is_none());
    assert!(harness.store.remaining().is_empty());

    // Released work is immediately visible to other workers.
    assert_eq!(service.queue_status().unwrap().pending, 1);
}
