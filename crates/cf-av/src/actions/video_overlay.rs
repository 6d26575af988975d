//! Picture-in-picture overlay of one video (or image) onto another.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{enable_clause, path_arg, run_ffmpeg, validate_window};
use crate::probe::probe_duration;
use crate::tools::ToolRegistry;

/// Options for the `video_overlay` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoOverlayOptions {
    /// Overlay asset reference. Falls back to the second input when absent.
    pub overlay: Option<String>,
    pub x: i64,
    pub y: i64,
    /// Scale factor applied to the overlay, in `(0, 1]`.
    pub scale: f64,
    /// Overlay opacity, in `[0, 1]`.
    pub opacity: f64,
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
}

impl Default for VideoOverlayOptions {
    fn default() -> Self {
        Self {
            overlay: None,
            x: 10,
            y: 10,
            scale: 1.0,
            opacity: 1.0,
            start_secs: None,
            end_secs: None,
        }
    }
}

impl VideoOverlayOptions {
    pub fn validate(&self) -> cf_core::Result<()> {
        if self.x < 0 || self.y < 0 {
            return Err(cf_core::Error::Validation(format!(
                "overlay position must be non-negative, got ({}, {})",
                self.x, self.y
            )));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(cf_core::Error::Validation(format!(
                "scale must be in (0, 1], got {}",
                self.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(cf_core::Error::Validation(format!(
                "opacity must be in [0, 1], got {}",
                self.opacity
            )));
        }
        validate_window(self.start_secs, self.end_secs)
    }
}

pub(crate) fn filter_graph(options: &VideoOverlayOptions) -> String {
    let mut graph = format!(
        "[1:v]scale=iw*{s}:ih*{s},format=rgba,colorchannelmixer=aa={o}[ov];\
         [0:v][ov]overlay={x}:{y}",
        s = options.scale,
        o = options.opacity,
        x = options.x,
        y = options.y,
    );
    if let Some(enable) = enable_clause(options.start_secs, options.end_secs) {
        graph.push_str(&enable);
    }
    graph.push_str("[v]");
    graph
}

pub(crate) fn build_args(
    base: &Path,
    overlay: &Path,
    output: &Path,
    options: &VideoOverlayOptions,
) -> Vec<String> {
    vec![
        "-i".into(),
        path_arg(base),
        "-i".into(),
        path_arg(overlay),
        "-filter_complex".into(),
        filter_graph(options),
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "0:a?".into(),
        "-c:a".into(),
        "copy".into(),
        path_arg(output),
    ]
}

/// Overlay `overlay` onto `base`, writing `output`.
pub async fn video_overlay(
    tools: &ToolRegistry,
    base: &Path,
    overlay: &Path,
    output: &Path,
    options: &VideoOverlayOptions,
    progress: impl FnMut(f64),
    cancel: Option<CancellationToken>,
) -> cf_core::Result<()> {
    let duration = probe_duration(tools, base).await?;
    tracing::info!(?base, ?overlay, x = options.x, y = options.y, "video overlay");
    run_ffmpeg(tools, build_args(base, overlay, output, options), duration, progress, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        assert!(VideoOverlayOptions::default().validate().is_ok());
        let cases = [
            VideoOverlayOptions { x: -1, ..Default::default() },
            VideoOverlayOptions { scale: 0.0, ..Default::default() },
            VideoOverlayOptions { scale: 1.5, ..Default::default() },
            VideoOverlayOptions { opacity: 1.1, ..Default::default() },
            VideoOverlayOptions {
                start_secs: Some(3.0),
                end_secs: Some(1.0),
                ..Default::default()
            },
        ];
        for case in cases {
            assert!(case.validate().is_err(), "{case:?}");
        }
    }

    #[test]
    fn graph_scales_and_fades() {
        let opts = VideoOverlayOptions {
            x: 20,
            y: 30,
            scale: 0.25,
            opacity: 0.5,
            start_secs: Some(2.0),
            end_secs: Some(6.0),
            ..Default::default()
        };
        assert_eq!(
            filter_graph(&opts),
            "[1:v]scale=iw*0.25:ih*0.25,format=rgba,colorchannelmixer=aa=0.5[ov];\
             [0:v][ov]overlay=20:30:enable='between(t,2,6)'[v]"
        );
    }

    #[test]
    fn audio_from_base_is_optional() {
        let args = build_args(
            Path::new("base.mp4"),
            Path::new("logo.png"),
            Path::new("out.mp4"),
            &VideoOverlayOptions::default(),
        );
        assert!(args.windows(2).any(|w| w == ["-map", "0:a?"]));
    }
}
