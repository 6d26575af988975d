//! Media duration lookup through ffprobe.

use std::path::Path;

use serde::Deserialize;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Extract the container duration from `ffprobe -show_format` JSON.
pub fn parse_duration(json: &str) -> cf_core::Result<Option<f64>> {
    let parsed: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| cf_core::Error::tool("ffprobe", format!("failed to parse output: {e}")))?;

    Ok(parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0))
}

/// Duration of a media file in seconds.
///
/// Returns `None` when ffprobe is unavailable or the container carries no
/// duration; callers then fall back to end-only progress.
pub async fn probe_duration(tools: &ToolRegistry, path: &Path) -> cf_core::Result<Option<f64>> {
    let Ok(ffprobe) = tools.require("ffprobe") else {
        return Ok(None);
    };

    let mut cmd = ToolCommand::new(ffprobe.path.clone());
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format"]);
    cmd.arg(path.to_string_lossy());

    let output = cmd.execute().await?;
    parse_duration(&output.stdout)
}

/// Sum of the durations of `paths`, or `None` if any is unknown.
pub async fn probe_total_duration(
    tools: &ToolRegistry,
    paths: &[impl AsRef<Path>],
) -> cf_core::Result<Option<f64>> {
    let mut total = 0.0;
    for path in paths {
        match probe_duration(tools, path.as_ref()).await? {
            Some(d) => total += d,
            None => return Ok(None),
        }
    }
    Ok(Some(total))
}
