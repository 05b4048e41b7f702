//! # mkv-extract-av
//!
//! Splitting depth-camera MKV recordings into per-stream files, built on the
//! `ffprobe` and `ffmpeg` command-line tools.
//!
//! This crate provides:
//! - Stream detection by track title ([`inspect_streams`])
//! - Raw frame reads into memory ([`read_frames`])
//! - Container metadata and factory calibration ([`extract_metadata`])
//! - Per-frame timestamps ([`extract_timestamps`])
//! - Concurrent per-stream exports ([`ExportGroup`])
//! - Sample-exact verification of exports ([`verify_extraction`])
//!
//! ## Example
//!
//! ```no_run
//! use mkv_extract_av::{inspect_streams, Artifacts, ToolRegistry, ToolsConfig};
//!
//! # async fn example() -> mkv_extract_av::Result<()> {
//! let tools = ToolRegistry::discover(&ToolsConfig::default());
//! let artifacts = Artifacts::new("/data/session1/test.mkv", None)?;
//! let streams = inspect_streams(&tools, artifacts.input()).await;
//! for (kind, index) in streams.known() {
//!     println!("{kind} is stream {index}, exported to {:?}", artifacts.stream_path(kind));
//! }
//! # Ok(())
//! # }
//! ```

mod error;
pub mod artifacts;
pub mod command;
pub mod export;
pub mod frames;
pub mod metadata;
pub mod probe;
pub mod streams;
pub mod timestamps;
pub mod tools;
pub mod verify;

#[cfg(test)]
mod test_support;

// Re-exports
pub use artifacts::{is_complete, write_atomic, Artifacts};
pub use command::{RunningTool, ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use export::{export_streams, ExportGroup, ExportOptions, ExportOutcome, ExportReport, StreamExport};
pub use frames::{
    read_frames, FrameRequest, PixelBuffer, RawPixelFormat, ReadOptions, SampleMismatch, Seek,
    StreamSelector,
};
pub use metadata::{
    extract_calibration, extract_metadata, probe_format, Calibration, MetadataRecord,
};
pub use probe::{count_frames, probe_video_stream, VideoStreamInfo};
pub use streams::{inspect_streams, StreamEntry, StreamKind, StreamMap, StreamProfile};
pub use timestamps::{extract_timestamps, format_timestamp, read_timestamps, write_timestamps};
pub use tools::{ToolInfo, ToolRegistry, ToolsConfig};
pub use verify::{
    chunk_ranges, verify_extraction, verify_streams, IntegrityReport, StreamCheck, StreamVerdict, VerifyOptions,
};
