//! Video overlay processor.

use std::sync::Arc;

use async_trait::async_trait;
use cf_av::{ToolRegistry, VideoOverlayOptions};
use cf_core::{OperationType, Result};

use super::{output_extension, parse_config, primary_and_asset};
use crate::context::StepContext;
use crate::processor::Processor;

/// Place a scaled, optionally translucent video or image over a base video.
#[derive(Debug)]
pub struct VideoOverlayProcessor {
    tools: Arc<ToolRegistry>,
}

impl VideoOverlayProcessor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for VideoOverlayProcessor {
    fn operation(&self) -> OperationType {
        OperationType::VideoOverlay
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<()> {
        parse_config::<VideoOverlayOptions>(self.operation(), config)?.validate()
    }

    fn validate_inputs(&self, inputs: &[String], config: &serde_json::Value) -> Result<()> {
        let options: VideoOverlayOptions = parse_config(self.operation(), config)?;
        primary_and_asset(self.operation(), inputs, options.overlay.as_deref(), "overlay")?;
        Ok(())
    }

    async fn execute(
        &self,
        inputs: &[String],
        config: &serde_json::Value,
        ctx: &StepContext<'_>,
    ) -> Result<Vec<String>> {
        let options: VideoOverlayOptions = parse_config(self.operation(), config)?;
        let (base, overlay) =
            primary_and_asset(self.operation(), inputs, options.overlay.as_deref(), "overlay")?;
        let base_path = ctx.resolve_input(base)?;
        let overlay_path = ctx.resolve_input(overlay)?;
        let (output, output_path) = ctx.allocate_output(&output_extension(base))?;

        cf_av::video_overlay(
            &self.tools,
            &base_path,
            &overlay_path,
            &output_path,
            &options,
            |pct| ctx.report(pct),
            Some(ctx.abort_token()),
        )
        .await?;

        Ok(vec![output])
    }
}
