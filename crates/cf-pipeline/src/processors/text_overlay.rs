//! Text overlay processor.

use std::sync::Arc;

use async_trait::async_trait;
use cf_av::{TextOverlayOptions, ToolRegistry};
use cf_core::{Error, OperationType, Result};

use super::{output_extension, parse_config, validate_references};
use crate::context::StepContext;
use crate::processor::Processor;

/// Burn a caption into a single video.
#[derive(Debug)]
pub struct TextOverlayProcessor {
    tools: Arc<ToolRegistry>,
}

impl TextOverlayProcessor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for TextOverlayProcessor {
    fn operation(&self) -> OperationType {
        OperationType::TextOverlay
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<()> {
        parse_config::<TextOverlayOptions>(self.operation(), config)?.validate()
    }

    fn validate_inputs(&self, inputs: &[String], _config: &serde_json::Value) -> Result<()> {
        if inputs.len() != 1 {
            return Err(Error::Validation(format!(
                "text_overlay takes exactly 1 input, got {}",
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
        let options: TextOverlayOptions = parse_config(self.operation(), config)?;
        let [reference] = inputs else {
            return Err(Error::Validation("text_overlay takes exactly 1 input".into()));
        };
        let input = ctx.resolve_input(reference)?;
        let (output, output_path) = ctx.allocate_output(&output_extension(reference))?;

        cf_av::text_overlay(
            &self.tools,
            &input,
            &output_path,
            &options,
            |pct| ctx.report(pct),
            Some(ctx.abort_token()),
        )
        .await?;

        Ok(vec![output])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation() {
        let p = TextOverlayProcessor::new(Arc::new(ToolRegistry::empty()));
        assert!(p.validate(&json!({"text": "Hello"}), &["v.mp4".into()]).is_ok());
        assert!(p.validate(&json!({}), &["v.mp4".into()]).is_err());
        assert!(p
            .validate(&json!({"text": "Hello"}), &["v.mp4".into(), "w.mp4".into()])
            .is_err());
    }
}
