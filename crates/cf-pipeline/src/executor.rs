//! Pipeline executor: runs one step or a chain of steps with result caching,
//! progress reporting, cooperative cancellation, and rollback of intermediate
//! artifacts on failure.

use std::sync::Arc;

use cf_core::{validate_operation_count, Error, Operation, OperationType, Result, TaskId, TaskType};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, ResultCache};
use crate::context::{RunContext, StepContext};
use crate::processor::Processor;
use crate::registry::ProcessorRegistry;
use crate::storage::ObjectStore;

/// The ordered steps of one task and the inputs of its first step.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    pub task_id: TaskId,
    pub operations: Vec<Operation>,
    pub inputs: Vec<String>,
}

impl PipelinePlan {
    /// Build the plan for a task.
    ///
    /// A non-combined task is a one-step pipeline running its own operation
    /// with the task config. A combined task runs its stored operations, of
    /// which there must be 2 to 10.
    pub fn for_task(
        task_id: TaskId,
        task_type: TaskType,
        config: &serde_json::Value,
        operations: &[Operation],
        inputs: &[String],
    ) -> Result<Self> {
        Ok(Self {
            task_id,
            operations: Self::steps_for(task_type, config, operations)?,
            inputs: inputs.to_vec(),
        })
    }

    /// The operations a task of `task_type` runs.
    pub fn steps_for(
        task_type: TaskType,
        config: &serde_json::Value,
        operations: &[Operation],
    ) -> Result<Vec<Operation>> {
        match task_type.operation() {
            Some(op) => Ok(vec![Operation::new(op, config.clone())]),
            None => {
                validate_operation_count(operations.len())?;
                Ok(operations.to_vec())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub operation: OperationType,
    /// Outputs came from the result cache; nothing was executed.
    pub cached: bool,
    pub outputs: Vec<String>,
}

/// How a run settled. Intermediate artifacts are already cleaned up.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed {
        output_files: Vec<String>,
        steps: Vec<StepReport>,
    },
    Failed {
        /// Index of the step that failed.
        step: usize,
        operation: OperationType,
        /// The error the step raised, as raised.
        error: Error,
        steps: Vec<StepReport>,
    },
    Cancelled {
        steps: Vec<StepReport>,
    },
}

impl PipelineOutcome {
    pub fn steps(&self) -> &[StepReport] {
        match self {
            PipelineOutcome::Completed { steps, .. }
            | PipelineOutcome::Failed { steps, .. }
            | PipelineOutcome::Cancelled { steps } => steps,
        }
    }

    /// Structured result recorded on the task: `{steps, cache_hits}`, plus
    /// `failed_step: {index, operation}` for a failed run.
    pub fn result_payload(&self) -> serde_json::Value {
        let steps = self.steps();
        let mut payload = serde_json::json!({
            "steps": steps,
            "cache_hits": steps.iter().filter(|s| s.cached).count(),
        });
        if let PipelineOutcome::Failed { step, operation, .. } = self {
            payload["failed_step"] = serde_json::json!({ "index": step, "operation": operation });
        }
        payload
    }
}

/// Runs pipeline plans against a processor registry and an optional cache.
pub struct PipelineExecutor {
    registry: Arc<ProcessorRegistry>,
    cache: Option<Arc<dyn ResultCache>>,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    /// Builder: consult and fill `cache` around every step.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Validate every step of `plan` without side effects.
    ///
    /// Each operation must resolve to a processor and carry a valid config;
    /// the first step's inputs are checked as well. Later steps take their
    /// inputs from earlier outputs and are checked when they run.
    pub fn validate(&self, plan: &PipelinePlan) -> Result<Vec<Arc<dyn Processor>>> {
        self.validate_steps(&plan.operations, &plan.inputs)
    }

    /// [`validate`](Self::validate) for steps that have no task yet.
    pub fn validate_steps(
        &self,
        operations: &[Operation],
        inputs: &[String],
    ) -> Result<Vec<Arc<dyn Processor>>> {
        let first = operations
            .first()
            .ok_or_else(|| Error::Validation("pipeline has no operations".into()))?;

        let processors = operations
            .iter()
            .enumerate()
            .map(|(index, operation)| {
                let processor = self.registry.resolve(operation.op_type)?;
                processor.validate_config(&operation.config).map_err(|e| {
                    Error::Validation(format!("operation {index} ({}): {e}", operation.op_type))
                })?;
                Ok(processor)
            })
            .collect::<Result<Vec<_>>>()?;

        processors[0]
            .validate_inputs(inputs, &first.config)
            .map_err(|e| Error::Validation(format!("operation 0 ({}): {e}", first.op_type)))?;

        Ok(processors)
    }

    /// Run `plan` to completion, failure or cancellation.
    ///
    /// # Errors
    ///
    /// Returns `Err` only when up-front validation fails, in which case
    /// nothing has run. Every later problem settles into a
    /// [`PipelineOutcome`] after rollback.
    pub async fn run(&self, plan: &PipelinePlan, run: &RunContext) -> Result<PipelineOutcome> {
        let processors = self.validate(plan)?;
        let total = plan.len();
        let mut current = plan.inputs.clone();
        let mut steps = Vec::with_capacity(total);

        for (index, (operation, processor)) in plan.operations.iter().zip(&processors).enumerate() {
            if run.is_cancelled() {
                tracing::info!(task_id = %run.task_id, step = index, "Pipeline cancelled");
                self.clean_up(run, &[]);
                return Ok(PipelineOutcome::Cancelled { steps });
            }

            let step = StepContext::new(run, index, total, processor.name());
            step.report(0.0);

            match self.run_step(processor.as_ref(), operation, &current, &step, run).await {
                Ok(report) => {
                    current = report.outputs.clone();
                    steps.push(report);
                }
                Err(error) => {
                    tracing::error!(
                        task_id = %run.task_id,
                        step = index,
                        operation = %operation.op_type,
                        "Step failed: {error}"
                    );
                    self.clean_up(run, &[]);
                    return Ok(PipelineOutcome::Failed {
                        step: index,
                        operation: operation.op_type,
                        error,
                        steps,
                    });
                }
            }
        }

        // A cancel that arrived during the last step still wins.
        if run.is_cancelled() {
            tracing::info!(task_id = %run.task_id, "Pipeline cancelled after final step");
            self.clean_up(run, &[]);
            return Ok(PipelineOutcome::Cancelled { steps });
        }

        self.clean_up(run, &current);
        tracing::info!(task_id = %run.task_id, "[100%] Pipeline complete");

        Ok(PipelineOutcome::Completed {
            output_files: current,
            steps,
        })
    }

    async fn run_step(
        &self,
        processor: &dyn Processor,
        operation: &Operation,
        inputs: &[String],
        step: &StepContext<'_>,
        run: &RunContext,
    ) -> Result<StepReport> {
        processor.validate_inputs(inputs, &operation.config)?;

        let key = CacheKey::compute(operation.op_type, inputs, &operation.config);
        if let Some(outputs) = self.cached_outputs(&key, step.store()) {
            tracing::debug!(
                task_id = %run.task_id,
                step = step.index(),
                key = %key,
                "Cache hit: {}",
                processor.name()
            );
            step.report(100.0);
            return Ok(StepReport {
                index: step.index(),
                operation: operation.op_type,
                cached: true,
                outputs,
            });
        }

        let name = processor.name();
        tracing::info!(task_id = %run.task_id, step = step.index(), "Starting: {name}");
        let outputs = processor.execute(inputs, &operation.config, step).await?;
        if outputs.is_empty() {
            return Err(Error::execution(name, "processor produced no outputs"));
        }
        run.artifacts.register(step.index(), outputs.iter().cloned());

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&key, operation.op_type, &outputs) {
                tracing::warn!(key = %key, "Failed to store cache entry: {e}");
            }
        }

        step.report(100.0);
        tracing::info!(task_id = %run.task_id, step = step.index(), "Completed: {name}");

        Ok(StepReport {
            index: step.index(),
            operation: operation.op_type,
            cached: false,
            outputs,
        })
    }

    /// Outputs recorded under `key`, if the entry is live and every output
    /// still exists. Stale entries are invalidated.
    fn cached_outputs(&self, key: &CacheKey, store: &dyn ObjectStore) -> Option<Vec<String>> {
        let cache = self.cache.as_ref()?;
        let hit = match cache.get(key) {
            Ok(Some(hit)) => hit,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, "Cache lookup failed: {e}");
                return None;
            }
        };

        let live = !hit.output_files.is_empty()
            && hit
                .output_files
                .iter()
                .all(|r| store.exists(r).unwrap_or(false));
        if live {
            return Some(hit.output_files);
        }

        tracing::debug!(key = %key, "Dropping stale cache entry");
        if let Err(e) = cache.invalidate(key) {
            tracing::warn!(key = %key, "Failed to invalidate cache entry: {e}");
        }
        None
    }

    /// Delete every artifact of the run not listed in `keep`.
    fn clean_up(&self, run: &RunContext, keep: &[String]) {
        for (index, reference) in run.artifacts.drain_except(keep) {
            match run.store.delete(&reference) {
                Ok(()) => tracing::debug!(
                    task_id = %run.task_id,
                    step = index,
                    "Removed artifact {reference}"
                ),
                Err(e) => {
                    let error = Error::Rollback {
                        artifact: reference,
                        message: e.to_string(),
                    };
                    tracing::warn!(task_id = %run.task_id, step = index, "{error}");
                }
            }
        }
    }
}
