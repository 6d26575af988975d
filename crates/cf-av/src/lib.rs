//! # cf-av
//!
//! ffmpeg-backed media transformations for the clipforge processors.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   cancellation, and line-by-line stderr streaming for external processes.
//! - **Probing** ([`probe`]) -- media duration lookup through ffprobe.
//! - **Progress parsing** ([`ProgressParser`]) -- turns ffmpeg `-progress`
//!   output into a 0–100 percentage.
//! - **Actions** ([`actions`]) -- one argument builder and runner per
//!   operation type: join, audio overlay, text overlay, subtitle burn-in and
//!   video overlay.

pub mod actions;
pub mod command;
pub mod probe;
pub mod progress;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use progress::ProgressParser;
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};

pub use actions::{
    audio_overlay, join, subtitles, text_overlay, validate_subtitle_ref, video_overlay,
    AudioOverlayOptions, JoinOptions, SubtitlesOptions, TextOverlayOptions, VideoOverlayOptions,
};
