//! Frame count and geometry of an exported single-stream file.

use std::path::Path;

use serde::Deserialize;

use crate::metadata::parse_frame_rate;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct FfprobeStreams {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<usize>,
    height: Option<usize>,
    nb_frames: Option<String>,
    r_frame_rate: Option<String>,
}

/// What the verifier needs to know about an exported video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoStreamInfo {
    pub frame_count: usize,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub frame_rate: Option<f64>,
}

fn parse_video_stream(json: &[u8]) -> Result<VideoStreamInfo> {
    let parsed: FfprobeStreams = serde_json::from_slice(json)
        .map_err(|e| Error::parse_error("ffprobe", format!("stream JSON: {}", e)))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| Error::parse_error("ffprobe", "no video stream"))?;

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| {
            Error::parse_error(
                "ffprobe",
                format!("unusable frame count: {:?}", stream.nb_frames),
            )
        })?;

    Ok(VideoStreamInfo {
        frame_count,
        width: stream.width,
        height: stream.height,
        frame_rate: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
    })
}

/// Probe the first video stream of `path`.
pub async fn probe_video_stream(tools: &ToolRegistry, path: &Path) -> Result<VideoStreamInfo> {
    let mut cmd = tools.ffprobe()?;
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,nb_frames,r_frame_rate",
        "-of",
        "json",
    ])
    .arg(path);

    let output = cmd.execute().await?;
    parse_video_stream(&output.stdout)
}

/// Number of frames in the first video stream of `path`.
pub async fn count_frames(tools: &ToolRegistry, path: &Path) -> Result<usize> {
    Ok(probe_video_stream(tools, path).await?.frame_count)
}
