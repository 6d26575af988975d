//! Subtitle burn-in processor.

use std::sync::Arc;

use async_trait::async_trait;
use cf_av::{validate_subtitle_ref, SubtitlesOptions, ToolRegistry};
use cf_core::{OperationType, Result};

use super::{output_extension, parse_config, primary_and_asset};
use crate::context::StepContext;
use crate::processor::Processor;

/// Burn an `.srt`, `.ass` or `.vtt` file into a video.
#[derive(Debug)]
pub struct SubtitlesProcessor {
    tools: Arc<ToolRegistry>,
}

impl SubtitlesProcessor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Processor for SubtitlesProcessor {
    fn operation(&self) -> OperationType {
        OperationType::Subtitles
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<()> {
        parse_config::<SubtitlesOptions>(self.operation(), config)?.validate()
    }

    fn validate_inputs(&self, inputs: &[String], config: &serde_json::Value) -> Result<()> {
        let options: SubtitlesOptions = parse_config(self.operation(), config)?;
        let (_, subs) =
            primary_and_asset(self.operation(), inputs, options.subtitles.as_deref(), "subtitles")?;
        validate_subtitle_ref(subs)
    }

    async fn execute(
        &self,
        inputs: &[String],
        config: &serde_json::Value,
        ctx: &StepContext<'_>,
    ) -> Result<Vec<String>> {
        let options: SubtitlesOptions = parse_config(self.operation(), config)?;
        let (video, subs) =
            primary_and_asset(self.operation(), inputs, options.subtitles.as_deref(), "subtitles")?;
        let video_path = ctx.resolve_input(video)?;
        let subs_path = ctx.resolve_input(subs)?;
        let (output, output_path) = ctx.allocate_output(&output_extension(video))?;

        cf_av::subtitles(
            &self.tools,
            &video_path,
            &subs_path,
            &output_path,
            &options,
            |pct| ctx.report(pct),
            Some(ctx.abort_token()),
        )
        .await?;

        Ok(vec![output])
    }
}
