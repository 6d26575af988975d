//! Burn a text caption into a video with `drawtext`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{enable_clause, escape_filter_value, path_arg, run_ffmpeg, validate_window};
use crate::probe::probe_duration;
use crate::tools::ToolRegistry;

const MAX_FONT_SIZE: u32 = 512;

/// Options for the `text_overlay` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextOverlayOptions {
    pub text: String,
    pub font_size: u32,
    pub color: String,
    /// Horizontal position; any ffmpeg drawtext expression.
    pub x: String,
    /// Vertical position; any ffmpeg drawtext expression.
    pub y: String,
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
}

impl Default for TextOverlayOptions {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 32,
            color: "white".into(),
            x: "(w-text_w)/2".into(),
            y: "h-text_h-40".into(),
            start_secs: None,
            end_secs: None,
        }
    }
}

impl TextOverlayOptions {
    pub fn validate(&self) -> cf_core::Result<()> {
        if self.text.trim().is_empty() {
            return Err(cf_core::Error::Validation("text must not be empty".into()));
        }
        if !(1..=MAX_FONT_SIZE).contains(&self.font_size) {
            return Err(cf_core::Error::Validation(format!(
                "font_size must be between 1 and {MAX_FONT_SIZE}, got {}",
                self.font_size
            )));
        }
        if self.color.is_empty() || self.x.is_empty() || self.y.is_empty() {
            return Err(cf_core::Error::Validation(
                "color, x and y must not be empty".into(),
            ));
        }
        validate_window(self.start_secs, self.end_secs)
    }
}

pub(crate) fn drawtext_filter(options: &TextOverlayOptions) -> String {
    let mut filter = format!(
        "drawtext=text='{}':fontsize={}:fontcolor={}:x={}:y={}",
        escape_filter_value(&options.text),
        options.font_size,
        escape_filter_value(&options.color),
        escape_filter_value(&options.x),
        escape_filter_value(&options.y),
    );
    if let Some(enable) = enable_clause(options.start_secs, options.end_secs) {
        filter.push_str(&enable);
    }
    filter
}

pub(crate) fn build_args(input: &Path, output: &Path, options: &TextOverlayOptions) -> Vec<String> {
    vec![
        "-i".into(),
        path_arg(input),
        "-vf".into(),
        drawtext_filter(options),
        "-c:a".into(),
        "copy".into(),
        path_arg(output),
    ]
}

/// Draw `options.text` over `input`, writing `output`.
pub async fn text_overlay(
    tools: &ToolRegistry,
    input: &Path,
    output: &Path,
    options: &TextOverlayOptions,
    progress: impl FnMut(f64),
    cancel: Option<CancellationToken>,
) -> cf_core::Result<()> {
    let duration = probe_duration(tools, input).await?;
    tracing::info!(?input, font_size = options.font_size, "text overlay");
    run_ffmpeg(tools, build_args(input, output, options), duration, progress, cancel).await
}
