//! Burn subtitles into a video.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{escape_filter_value, path_arg, run_ffmpeg};
use crate::probe::probe_duration;
use crate::tools::ToolRegistry;

/// Subtitle formats the `subtitles` filter accepts here.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "vtt"];

/// Options for the `subtitles` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubtitlesOptions {
    /// Subtitle asset reference. Falls back to the second input when absent.
    pub subtitles: Option<String>,
    /// ASS style override, e.g. `FontSize=24,PrimaryColour=&H00FFFF&`.
    pub force_style: Option<String>,
}

impl SubtitlesOptions {
    pub fn validate(&self) -> cf_core::Result<()> {
        if let Some(ref subs) = self.subtitles {
            validate_subtitle_ref(subs)?;
        }
        if matches!(self.force_style.as_deref(), Some(s) if s.trim().is_empty()) {
            return Err(cf_core::Error::Validation("force_style must not be empty".into()));
        }
        Ok(())
    }
}

/// Reject subtitle references with an unsupported extension.
pub fn validate_subtitle_ref(reference: &str) -> cf_core::Result<()> {
    let ext = Path::new(reference)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    match ext {
        Some(ext) if SUBTITLE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(cf_core::Error::Validation(format!(
            "subtitle file '{reference}' must have one of the extensions {SUBTITLE_EXTENSIONS:?}"
        ))),
    }
}

pub(crate) fn subtitles_filter(subs: &Path, options: &SubtitlesOptions) -> String {
    let mut filter = format!("subtitles=filename='{}'", escape_filter_value(&path_arg(subs)));
    if let Some(ref style) = options.force_style {
        filter.push_str(&format!(":force_style='{}'", escape_filter_value(style)));
    }
    filter
}

pub(crate) fn build_args(
    video: &Path,
    subs: &Path,
    output: &Path,
    options: &SubtitlesOptions,
) -> Vec<String> {
    vec![
        "-i".into(),
        path_arg(video),
        "-vf".into(),
        subtitles_filter(subs, options),
        "-c:a".into(),
        "copy".into(),
        path_arg(output),
    ]
}

/// Burn `subs` into `video`, writing `output`.
pub async fn subtitles(
    tools: &ToolRegistry,
    video: &Path,
    subs: &Path,
    output: &Path,
    options: &SubtitlesOptions,
    progress: impl FnMut(f64),
    cancel: Option<CancellationToken>,
) -> cf_core::Result<()> {
    let duration = probe_duration(tools, video).await?;
    tracing::info!(?video, ?subs, "subtitles burn-in");
    run_ffmpeg(tools, build_args(video, subs, output, options), duration, progress, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check() {
        assert!(validate_subtitle_ref("subs/en.srt").is_ok());
        assert!(validate_subtitle_ref("subs/EN.ASS").is_ok());
        assert!(validate_subtitle_ref("subs/en.vtt").is_ok());
        assert!(validate_subtitle_ref("subs/en.txt").is_err());
        assert!(validate_subtitle_ref("subs/noext").is_err());
    }

    #[test]
    fn options_validation() {
        assert!(SubtitlesOptions::default().validate().is_ok());
        let bad = SubtitlesOptions {
            subtitles: Some("x.doc".into()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let blank_style = SubtitlesOptions {
            force_style: Some(" ".into()),
            ..Default::default()
        };
        assert!(blank_style.validate().is_err());
    }

    #[test]
    fn filter_with_style() {
        let opts = SubtitlesOptions {
            subtitles: None,
            force_style: Some("FontSize=24".into()),
        };
        assert_eq!(
            subtitles_filter(Path::new("/m/a:b.srt"), &opts),
            "subtitles=filename='/m/a\\:b.srt':force_style='FontSize=24'"
        );
    }
}
