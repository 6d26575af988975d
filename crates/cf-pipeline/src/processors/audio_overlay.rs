//! Audio overlay processor.

use std::sync::Arc;

use async_trait::async_trait;
use cf_av::{AudioOverlayOptions, ToolRegistry};
use cf_core::{OperationType, Result};

use super::{output_extension, parse_config, primary_and_asset};
use crate::context::StepContext;
use crate::processor::Processor;

/// Mix a music or voice track into a video, or replace its audio.
#[derive(Debug)]
pub struct AudioOverlayProcessor {
    tools: Arc<ToolRegistry>,
}

impl AudioOverlayProcessor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for AudioOverlayProcessor {
    fn operation(&self) -> OperationType {
        OperationType::AudioOverlay
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<()> {
        parse_config::<AudioOverlayOptions>(self.operation(), config)?.validate()
    }

    fn validate_inputs(&self, inputs: &[String], config: &serde_json::Value) -> Result<()> {
        let options: AudioOverlayOptions = parse_config(self.operation(), config)?;
        primary_and_asset(self.operation(), inputs, options.audio.as_deref(), "audio")?;
        Ok(())
    }

    async fn execute(
        &self,
        inputs: &[String],
        config: &serde_json::Value,
        ctx: &StepContext<'_>,
    ) -> Result<Vec<String>> {
        let options: AudioOverlayOptions = parse_config(self.operation(), config)?;
        let (video, audio) =
            primary_and_asset(self.operation(), inputs, options.audio.as_deref(), "audio")?;
        let video_path = ctx.resolve_input(video)?;
        let audio_path = ctx.resolve_input(audio)?;
        let (output, output_path) = ctx.allocate_output(&output_extension(video))?;

        cf_av::audio_overlay(
            &self.tools,
            &video_path,
            &audio_path,
            &output_path,
            &options,
            |pct| ctx.report(pct),
            Some(ctx.abort_token()),
        )
        .await?;

        Ok(vec![output])
    }
}
