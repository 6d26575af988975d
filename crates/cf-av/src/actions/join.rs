//! Concatenate clips with ffmpeg.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{path_arg, run_ffmpeg};
use crate::probe::probe_total_duration;
use crate::tools::ToolRegistry;

const FORMATS: &[&str] = &["mp4", "mkv", "mov", "webm"];

/// Options for the `join` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoinOptions {
    /// Re-encode through the concat filter instead of stream-copying. Needed
    /// when the clips do not share codec parameters.
    pub reencode: bool,
    /// Output container extension.
    pub format: String,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            reencode: false,
            format: "mp4".into(),
        }
    }
}

impl JoinOptions {
    pub fn validate(&self) -> cf_core::Result<()> {
        if !FORMATS.contains(&self.format.as_str()) {
            return Err(cf_core::Error::Validation(format!(
                "unsupported join format '{}'; expected one of {FORMATS:?}",
                self.format
            )));
        }
        Ok(())
    }
}

/// Contents of a concat-demuxer list file.
pub(crate) fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", path_arg(p).replace('\'', "'\\''")))
        .collect()
}

/// Arguments for stream-copy concatenation through a list file.
pub(crate) fn copy_args(list_file: &Path, output: &Path) -> Vec<String> {
    vec![
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        path_arg(list_file),
        "-c".into(),
        "copy".into(),
        path_arg(output),
    ]
}

/// Arguments for re-encoding concatenation through the concat filter.
pub(crate) fn reencode_args(inputs: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args = Vec::new();
    for input in inputs {
        args.push("-i".into());
        args.push(path_arg(input));
    }

    let streams: String = (0..inputs.len()).map(|i| format!("[{i}:v:0][{i}:a:0]")).collect();
    args.extend([
        "-filter_complex".into(),
        format!("{streams}concat=n={}:v=1:a=1[v][a]", inputs.len()),
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "[a]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-c:a".into(),
        "aac".into(),
        path_arg(output),
    ]);
    args
}

fn absolutize(p: &Path) -> cf_core::Result<PathBuf> {
    if p.is_absolute() {
        Ok(p.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(p))
    }
}

/// Concatenate `inputs` in order into `output`.
pub async fn join(
    tools: &ToolRegistry,
    inputs: &[PathBuf],
    output: &Path,
    options: &JoinOptions,
    progress: impl FnMut(f64),
    cancel: Option<CancellationToken>,
) -> cf_core::Result<()> {
    if inputs.len() < 2 {
        return Err(cf_core::Error::Validation(format!(
            "join requires at least 2 inputs, got {}",
            inputs.len()
        )));
    }

    let duration = probe_total_duration(tools, inputs).await?;
    tracing::info!(inputs = inputs.len(), reencode = options.reencode, ?output, "join");

    if options.reencode {
        return run_ffmpeg(tools, reencode_args(inputs, output), duration, progress, cancel).await;
    }

    // The concat demuxer resolves relative entries against the list file.
    let absolute: Vec<PathBuf> = inputs
        .iter()
        .map(|p| absolutize(p))
        .collect::<cf_core::Result<_>>()?;
    let mut list = tempfile::Builder::new()
        .prefix("clipforge-concat-")
        .suffix(".txt")
        .tempfile()?;
    list.write_all(concat_list(&absolute).as_bytes())?;
    list.flush()?;

    run_ffmpeg(tools, copy_args(list.path(), output), duration, progress, cancel).await
}
