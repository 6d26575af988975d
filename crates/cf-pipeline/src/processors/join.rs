//! Join processor.

use std::sync::Arc;

use async_trait::async_trait;
use cf_av::{JoinOptions, ToolRegistry};
use cf_core::{Error, OperationType, Result};

use super::{parse_config, validate_references};
use crate::context::StepContext;
use crate::processor::Processor;

/// Concatenate two or more clips in input order.
#[derive(Debug)]
pub struct JoinProcessor {
    tools: Arc<ToolRegistry>,
}

impl JoinProcessor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for JoinProcessor {
    fn operation(&self) -> OperationType {
        OperationType::Join
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<()> {
        parse_config::<JoinOptions>(self.operation(), config)?.validate()
    }

    fn validate_inputs(&self, inputs: &[String], _config: &serde_json::Value) -> Result<()> {
        if inputs.len() < 2 {
            return Err(Error::Validation(format!(
                "join requires at least 2 inputs, got {}",
                inputs.len()
            )));
        }
        validate_references(inputs)
    }

    async fn execute(
        &self,
        inputs: &[String],
        config: &serde_json::Value,
        ctx: &StepContext<'_>,
    ) -> Result<Vec<String>> {
        let options: JoinOptions = parse_config(self.operation(), config)?;
        let paths = inputs
            .iter()
            .map(|r| ctx.resolve_input(r))
            .collect::<Result<Vec<_>>>()?;
        let (output, output_path) = ctx.allocate_output(&options.format)?;

        cf_av::join(
            &self.tools,
            &paths,
            &output_path,
            &options,
            |pct| ctx.report(pct),
            Some(ctx.abort_token()),
        )
        .await?;

        Ok(vec![output])
    }
}
