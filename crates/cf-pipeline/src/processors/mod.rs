//! Built-in processors.
//!
//! Each processor wraps the matching [`cf_av::actions`] function, presenting
//! it behind the unified [`Processor`](crate::processor::Processor) trait.

mod audio_overlay;
mod join;
mod subtitles;
mod text_overlay;
mod video_overlay;

pub use audio_overlay::AudioOverlayProcessor;
pub use join::JoinProcessor;
pub use subtitles::SubtitlesProcessor;
pub use text_overlay::TextOverlayProcessor;
pub use video_overlay::VideoOverlayProcessor;

use cf_core::{Error, OperationType, Result};
use serde::de::DeserializeOwned;

use crate::storage::{extension_of, validate_reference};

/// Containers an output may keep from its primary input.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm"];

/// Deserialize an operation config; `null` means all defaults.
pub(crate) fn parse_config<T: DeserializeOwned>(
    op: OperationType,
    config: &serde_json::Value,
) -> Result<T> {
    let value = if config.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| Error::Validation(format!("invalid {op} config: {e}")))
}

pub(crate) fn validate_references(inputs: &[String]) -> Result<()> {
    inputs.iter().try_for_each(|r| validate_reference(r))
}

/// Split step inputs into the primary video and a secondary asset.
///
/// The asset comes from the config when set (the step then takes exactly one
/// input, as inside a pipeline); otherwise it is the second of two inputs.
pub(crate) fn primary_and_asset<'a>(
    op: OperationType,
    inputs: &'a [String],
    configured: Option<&'a str>,
    asset: &str,
) -> Result<(&'a str, &'a str)> {
    validate_references(inputs)?;
    match (inputs, configured) {
        ([video], Some(extra)) => {
            validate_reference(extra)?;
            Ok((video.as_str(), extra))
        }
        ([video, extra], None) => Ok((video.as_str(), extra.as_str())),
        (_, Some(_)) => Err(Error::Validation(format!(
            "{op} takes exactly 1 input when `{asset}` is configured, got {}",
            inputs.len()
        ))),
        (_, None) => Err(Error::Validation(format!(
            "{op} needs a video and {asset} input (or `{asset}` in config), got {} inputs",
            inputs.len()
        ))),
    }
}

/// Output extension following the primary input's container.
pub(crate) fn output_extension(primary: &str) -> String {
    extension_of(primary)
        .filter(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or_else(|| "mp4".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn asset_from_second_input_or_config() {
        let op = OperationType::AudioOverlay;
        let two = refs(&["v.mp4", "a.mp3"]);
        assert_eq!(primary_and_asset(op, &two, None, "audio").unwrap(), ("v.mp4", "a.mp3"));

        let one = refs(&["v.mp4"]);
        assert_eq!(
            primary_and_asset(op, &one, Some("music/a.mp3"), "audio").unwrap(),
            ("v.mp4", "music/a.mp3")
        );

        assert!(primary_and_asset(op, &one, None, "audio").is_err());
        assert!(primary_and_asset(op, &two, Some("a.mp3"), "audio").is_err());
        assert!(primary_and_asset(op, &one, Some("../a.mp3"), "audio").is_err());
    }

    #[test]
    fn output_follows_container() {
        assert_eq!(output_extension("a/clip.MKV"), "mkv");
        assert_eq!(output_extension("a/logo.png"), "mp4");
        assert_eq!(output_extension("noext"), "mp4");
    }

    #[test]
    fn null_config_means_defaults() {
        let opts: cf_av::JoinOptions =
            parse_config(OperationType::Join, &serde_json::Value::Null).unwrap();
        assert_eq!(opts, cf_av::JoinOptions::default());

        let err = parse_config::<cf_av::JoinOptions>(OperationType::Join, &serde_json::json!([1]))
            .unwrap_err();
        assert!(err.is_validation());
    }
}
