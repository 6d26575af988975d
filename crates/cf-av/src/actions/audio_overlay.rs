//! Mix or replace a video's audio track.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{path_arg, run_ffmpeg};
use crate::probe::probe_duration;
use crate::tools::ToolRegistry;

const MAX_VOLUME: f64 = 4.0;

/// Options for the `audio_overlay` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioOverlayOptions {
    /// Audio asset reference. Falls back to the second input when absent.
    pub audio: Option<String>,
    /// Gain applied to the overlaid track.
    pub volume: f64,
    /// Mix with the original audio (`true`) or replace it (`false`).
    pub mix: bool,
    /// Delay before the overlaid track starts.
    pub offset_secs: f64,
}

impl Default for AudioOverlayOptions {
    fn default() -> Self {
        Self {
            audio: None,
            volume: 1.0,
            mix: true,
            offset_secs: 0.0,
        }
    }
}

impl AudioOverlayOptions {
    pub fn validate(&self) -> cf_core::Result<()> {
        if !(0.0..=MAX_VOLUME).contains(&self.volume) {
            return Err(cf_core::Error::Validation(format!(
                "volume must be between 0 and {MAX_VOLUME}, got {}",
                self.volume
            )));
        }
        if !self.offset_secs.is_finite() || self.offset_secs < 0.0 {
            return Err(cf_core::Error::Validation(format!(
                "offset_secs must be a non-negative number, got {}",
                self.offset_secs
            )));
        }
        Ok(())
    }
}

pub(crate) fn build_args(
    video: &Path,
    audio: &Path,
    output: &Path,
    options: &AudioOverlayOptions,
) -> Vec<String> {
    let delay_ms = (options.offset_secs * 1000.0).round() as u64;
    let overlay = format!("[1:a]adelay={delay_ms}|{delay_ms},volume={}", options.volume);
    let graph = if options.mix {
        format!("{overlay}[ov];[0:a][ov]amix=inputs=2:duration=first:dropout_transition=0[a]")
    } else {
        format!("{overlay}[a]")
    };

    let mut args = vec![
        "-i".into(),
        path_arg(video),
        "-i".into(),
        path_arg(audio),
        "-filter_complex".into(),
        graph,
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "[a]".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
    ];
    if !options.mix {
        args.push("-shortest".into());
    }
    args.push(path_arg(output));
    args
}

/// Overlay `audio` onto `video`, writing `output`.
pub async fn audio_overlay(
    tools: &ToolRegistry,
    video: &Path,
    audio: &Path,
    output: &Path,
    options: &AudioOverlayOptions,
    progress: impl FnMut(f64),
    cancel: Option<CancellationToken>,
) -> cf_core::Result<()> {
    let duration = probe_duration(tools, video).await?;
    tracing::info!(?video, ?audio, mix = options.mix, "audio overlay");
    run_ffmpeg(tools, build_args(video, audio, output, options), duration, progress, cancel).await
}
