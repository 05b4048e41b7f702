//! Per-frame presentation timestamps of the depth stream.

use std::path::Path;

use serde::Deserialize;

use crate::artifacts::write_atomic;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct FfprobeFrames {
    #[serde(default)]
    frames: Vec<FfprobeFrame>,
}

// ffprobe has renamed this field over the years; newer builds only emit
// `pts_time`.
#[derive(Debug, Deserialize)]
struct FfprobeFrame {
    pts_time: Option<String>,
    pkt_pts_time: Option<String>,
    best_effort_timestamp_time: Option<String>,
}

impl FfprobeFrame {
    fn seconds(&self) -> Option<f64> {
        [
            &self.pts_time,
            &self.pkt_pts_time,
            &self.best_effort_timestamp_time,
        ]
        .into_iter()
        .flatten()
        .find_map(|t| t.parse().ok())
    }
}

/// Parse ffprobe `-show_entries frame=...` JSON into seconds, in frame order.
pub fn parse_frame_timestamps(json: &[u8]) -> Result<Vec<f64>> {
    let parsed: FfprobeFrames = serde_json::from_slice(json)
        .map_err(|e| Error::parse_error("ffprobe", format!("frame JSON: {}", e)))?;

    parsed
        .frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            frame.seconds().ok_or_else(|| {
                Error::parse_error("ffprobe", format!("frame {} has no presentation timestamp", i))
            })
        })
        .collect()
}

/// Read every frame timestamp of stream `stream_index`.
///
/// The series is returned as the container reports it: no deduplication and
/// no filling of gaps left by dropped frames.
pub async fn extract_timestamps(
    tools: &ToolRegistry,
    input: &Path,
    stream_index: usize,
    threads: usize,
) -> Result<Vec<f64>> {
    let mut cmd = tools.ffprobe()?;
    cmd.args(["-v", "quiet", "-select_streams"])
        .arg(stream_index.to_string())
        .arg("-threads")
        .arg(threads.to_string())
        .args([
            "-show_entries",
            "frame=pts_time,pkt_pts_time,best_effort_timestamp_time",
            "-print_format",
            "json",
        ])
        .arg(input);

    let output = cmd.execute().await?;
    let timestamps = parse_frame_timestamps(&output.stdout)?;
    tracing::debug!("Read {} frame timestamps from {:?}", timestamps.len(), input);
    Ok(timestamps)
}

/// Newline-separated, no trailing newline.
pub fn format_timestamps(timestamps: &[f64]) -> String {
    timestamps
        .iter()
        .map(|&t| format_timestamp(t))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shortest round-tripping decimal. Values below 1e-4 or from 1e16 up use
/// a signed, at least two-digit exponent (`1e-07`, `1.5e+16`).
pub fn format_timestamp(t: f64) -> String {
    let text = format!("{:?}", t);
    match text.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(exp) => format!(
                "{}e{}{:02}",
                mantissa,
                if exp < 0 { '-' } else { '+' },
                exp.unsigned_abs()
            ),
            Err(_) => text,
        },
        None => text,
    }
}

pub fn write_timestamps(path: &Path, timestamps: &[f64]) -> Result<()> {
    write_atomic(path, format_timestamps(timestamps).as_bytes())
}

/// Load a `.timestamps.txt` sidecar.
pub fn read_timestamps(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::file_not_found(path)
        } else {
            Error::Io(e)
        }
    })?;

    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, l)| {
            l.parse().map_err(|_| {
                Error::InvalidInput(format!("{:?} line {}: not a timestamp: {:?}", path, i + 1, l))
            })
        })
        .collect()
}
