//! Media actions, one per operation type.
//!
//! Every action splits into a pure argument builder (tested without ffmpeg)
//! and an async runner that streams `-progress` output to a callback.

mod audio_overlay;
mod join;
mod subtitles;
mod text_overlay;
mod video_overlay;

pub use audio_overlay::{audio_overlay, AudioOverlayOptions};
pub use join::{join, JoinOptions};
pub use subtitles::{subtitles, validate_subtitle_ref, SubtitlesOptions, SUBTITLE_EXTENSIONS};
pub use text_overlay::{text_overlay, TextOverlayOptions};
pub use video_overlay::{video_overlay, VideoOverlayOptions};

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::progress::ProgressParser;
use crate::tools::ToolRegistry;

/// Run ffmpeg with `args`, reporting 0–100 progress against `duration_secs`.
pub(crate) async fn run_ffmpeg(
    tools: &ToolRegistry,
    args: Vec<String>,
    duration_secs: Option<f64>,
    mut progress: impl FnMut(f64),
    cancel: Option<CancellationToken>,
) -> cf_core::Result<()> {
    let ffmpeg = tools.require("ffmpeg")?;

    let mut cmd = ToolCommand::new(ffmpeg.path.clone());
    cmd.timeout(ffmpeg.timeout);
    cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-progress", "pipe:2", "-nostats"]);
    cmd.args(args);

    tracing::debug!(args = ?cmd.get_args(), "running ffmpeg");

    let mut parser = ProgressParser::new(duration_secs);
    cmd.execute_with_stderr_callback(
        |line| {
            if let Some(pct) = parser.feed(line) {
                progress(pct);
            }
        },
        cancel,
    )
    .await?;

    Ok(())
}

pub(crate) fn path_arg(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

/// Escape a value for use inside a single-quoted filtergraph option.
pub(crate) fn escape_filter_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' | ':' | '%' | ',' | ';' | '[' | ']' => {
                out.push('\\');
                out.push(c);
            }
            '\'' => out.push_str("'\\''"),
            '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

/// `enable='between(t,start,end)'` clause for timed overlays.
pub(crate) fn enable_clause(start_secs: Option<f64>, end_secs: Option<f64>) -> Option<String> {
    match (start_secs, end_secs) {
        (None, None) => None,
        (Some(s), None) => Some(format!(":enable='gte(t,{s})'")),
        (None, Some(e)) => Some(format!(":enable='lte(t,{e})'")),
        (Some(s), Some(e)) => Some(format!(":enable='between(t,{s},{e})'")),
    }
}

/// Validate an optional `[start, end]` window.
pub(crate) fn validate_window(
    start_secs: Option<f64>,
    end_secs: Option<f64>,
) -> cf_core::Result<()> {
    for (name, v) in [("start_secs", start_secs), ("end_secs", end_secs)] {
        if let Some(v) = v {
            if !v.is_finite() || v < 0.0 {
                return Err(cf_core::Error::Validation(format!(
                    "{name} must be a non-negative number, got {v}"
                )));
            }
        }
    }
    if let (Some(s), Some(e)) = (start_secs, end_secs) {
        if e <= s {
            return Err(cf_core::Error::Validation(format!(
                "end_secs ({e}) must be greater than start_secs ({s})"
            )));
        }
    }
    Ok(())
}
