//! The [`Processor`] trait defines one executable operation type.

use async_trait::async_trait;
use cf_core::OperationType;

use crate::context::StepContext;

/// Executes one operation type.
///
/// Validation is pure: it never touches storage or tools, so the executor
/// can check a whole pipeline before anything runs. Execution reports local
/// progress in `[0, 100]` through the step context and returns exactly the
/// output references it produced.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The operation type this processor implements.
    fn operation(&self) -> OperationType;

    /// A short name for logs and progress messages.
    fn name(&self) -> &'static str {
        self.operation().as_str()
    }

    /// Check the operation config on its own.
    fn validate_config(&self, config: &serde_json::Value) -> cf_core::Result<()>;

    /// Check the input references against the config (count, kinds).
    fn validate_inputs(&self, inputs: &[String], config: &serde_json::Value) -> cf_core::Result<()>;

    /// Full validation of one step.
    fn validate(&self, config: &serde_json::Value, inputs: &[String]) -> cf_core::Result<()> {
        self.validate_config(config)?;
        self.validate_inputs(inputs, config)
    }

    /// Perform the operation.
    async fn execute(
        &self,
        inputs: &[String],
        config: &serde_json::Value,
        ctx: &StepContext<'_>,
    ) -> cf_core::Result<Vec<String>>;
}
