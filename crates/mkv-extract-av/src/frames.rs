//! Reading frame ranges into memory through an `ffmpeg` raw-video pipe.

use std::ffi::OsString;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::streams::inspect_streams;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Raw sample layouts ffmpeg can write to the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RawPixelFormat {
    /// 16-bit little-endian grayscale (depth and IR).
    #[default]
    #[serde(rename = "gray16le")]
    Gray16le,
    /// 8-bit grayscale.
    #[serde(rename = "gray")]
    Gray8,
}

impl RawPixelFormat {
    /// The `-pix_fmt` value.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            RawPixelFormat::Gray16le => "gray16le",
            RawPixelFormat::Gray8 => "gray",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            RawPixelFormat::Gray16le => 2,
            RawPixelFormat::Gray8 => 1,
        }
    }
}

impl fmt::Display for RawPixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

impl FromStr for RawPixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gray16le" => Ok(RawPixelFormat::Gray16le),
            "gray" | "gray8" => Ok(RawPixelFormat::Gray8),
            other => Err(Error::InvalidInput(format!(
                "Unsupported raw pixel format: {}",
                other
            ))),
        }
    }
}

/// A run of frames as unsigned 16-bit samples, shape `(frames, height, width)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    frames: usize,
    height: usize,
    width: usize,
    data: Vec<u16>,
}

/// Position of the first differing sample between two buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleMismatch {
    pub frame: usize,
    pub row: usize,
    pub col: usize,
}

impl PixelBuffer {
    /// Interpret packed raw samples. The byte count must match the shape
    /// exactly.
    pub fn from_raw(
        bytes: &[u8],
        frames: usize,
        height: usize,
        width: usize,
        format: RawPixelFormat,
    ) -> Result<Self> {
        let samples = frames * height * width;
        let expected = samples * format.bytes_per_sample();
        if bytes.len() != expected {
            return Err(Error::parse_error(
                "ffmpeg",
                format!(
                    "expected {} bytes for {} frames of {}x{} {}, got {}",
                    expected,
                    frames,
                    width,
                    height,
                    format,
                    bytes.len()
                ),
            ));
        }

        let data = match format {
            RawPixelFormat::Gray16le => bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
            RawPixelFormat::Gray8 => bytes.iter().map(|&b| u16::from(b)).collect(),
        };

        Ok(Self {
            frames,
            height,
            width,
            data,
        })
    }

    /// `(frames, height, width)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.frames, self.height, self.width)
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Samples of one frame, row-major.
    pub fn frame(&self, index: usize) -> Option<&[u16]> {
        let len = self.height * self.width;
        self.data.get(index * len..(index + 1) * len)
    }

    pub fn get(&self, frame: usize, row: usize, col: usize) -> Option<u16> {
        if frame >= self.frames || row >= self.height || col >= self.width {
            return None;
        }
        self.data
            .get((frame * self.height + row) * self.width + col)
            .copied()
    }

    pub fn samples(&self) -> &[u16] {
        &self.data
    }

    /// The first sample that differs, for buffers of the same shape.
    /// Returns `None` when the buffers are equal or shapes differ.
    pub fn first_mismatch(&self, other: &PixelBuffer) -> Option<SampleMismatch> {
        if self.shape() != other.shape() {
            return None;
        }
        let pos = self.data.iter().zip(&other.data).position(|(a, b)| a != b)?;
        let plane = self.height * self.width;
        Some(SampleMismatch {
            frame: pos / plane,
            row: (pos % plane) / self.width,
            col: pos % self.width,
        })
    }
}

/// Where a read starts.
///
/// Containers straight from the camera are addressed by timestamp; exported
/// files keep frame order but not the original timestamps, so they are
/// addressed by index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Seek {
    Index { first: usize, fps: f64 },
    Timestamp(f64),
}

/// A contiguous range of frames to read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    pub seek: Seek,
    pub count: usize,
}

impl FrameRequest {
    /// Frames `range` of a file played back at `fps`.
    pub fn by_index(range: Range<usize>, fps: f64) -> Self {
        Self {
            seek: Seek::Index {
                first: range.start,
                fps,
            },
            count: range.len(),
        }
    }

    /// One frame per timestamp, starting at the first.
    pub fn by_timestamps(timestamps: &[f64]) -> Self {
        Self {
            seek: Seek::Timestamp(timestamps.first().copied().unwrap_or(0.0)),
            count: timestamps.len(),
        }
    }

    /// Seek position in seconds.
    pub fn start_seconds(&self) -> f64 {
        match self.seek {
            Seek::Index { first, fps } => first as f64 / fps,
            Seek::Timestamp(t) => t,
        }
    }
}

/// Which stream of the source to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelector {
    Index(usize),
    /// A stream tag, resolved through [`inspect_streams`]; unknown tags fall
    /// back to stream 0.
    Name(String),
}

/// Decode geometry and tuning for a frame read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub width: usize,
    pub height: usize,
    pub pixel_format: RawPixelFormat,
    pub threads: usize,
    pub slices: usize,
    pub slice_crc: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 576,
            pixel_format: RawPixelFormat::Gray16le,
            threads: 6,
            slices: 24,
            slice_crc: true,
        }
    }
}

/// Render seconds as `H:MM:SS.ffffff` for `-ss`.
pub fn format_seek_time(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let micros = (seconds.abs() * 1_000_000.0).round() as u64;
    let total_secs = micros / 1_000_000;
    format!(
        "{}{}:{:02}:{:02}.{:06}",
        sign,
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        micros % 1_000_000
    )
}

/// Formats that hold several streams and need an explicit `-map`.
fn is_multiplexed(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mkv") || e.eq_ignore_ascii_case("avi"))
        .unwrap_or(false)
}

/// The ffmpeg arguments for a raw read, without running anything.
pub fn frame_read_args(
    input: &Path,
    request: &FrameRequest,
    stream: usize,
    options: &ReadOptions,
) -> Vec<OsString> {
    let start = format_seek_time(request.start_seconds());
    let count = request.count.to_string();
    let size = format!("{}x{}", options.width, options.height);
    let threads = options.threads.to_string();
    let slices = options.slices.to_string();
    let slice_crc = u8::from(options.slice_crc).to_string();

    let mut args: Vec<OsString> = vec![
        "-loglevel".into(),
        "fatal".into(),
        "-ss".into(),
        start.into(),
        "-i".into(),
        input.as_os_str().into(),
    ];
    args.extend(
        [
            "-vframes",
            count.as_str(),
            "-f",
            "image2pipe",
            "-s",
            size.as_str(),
            "-pix_fmt",
            options.pixel_format.ffmpeg_name(),
            "-threads",
            threads.as_str(),
            "-slices",
            slices.as_str(),
            "-slicecrc",
            slice_crc.as_str(),
            "-vcodec",
            "rawvideo",
        ]
        .map(OsString::from),
    );

    if is_multiplexed(input) {
        let map = format!("0:{}", stream);
        args.extend(["-map", map.as_str(), "-vsync", "0"].map(OsString::from));
    }

    args.push(OsString::from("-"));
    args
}

/// Decode exactly `request.count` frames into a [`PixelBuffer`].
///
/// Any stderr output from ffmpeg, a non-zero exit, or a short pipe is an
/// error; partial buffers are never returned.
pub async fn read_frames(
    tools: &ToolRegistry,
    input: &Path,
    request: &FrameRequest,
    stream: &StreamSelector,
    options: &ReadOptions,
) -> Result<PixelBuffer> {
    if request.count == 0 {
        return Err(Error::InvalidInput("frame read of zero frames".to_string()));
    }

    let index = match stream {
        StreamSelector::Index(i) => *i,
        StreamSelector::Name(tag) => inspect_streams(tools, input).await.get(tag).unwrap_or(0),
    };

    let mut cmd = tools.ffmpeg()?;
    cmd.args(frame_read_args(input, request, index, options))
        .allow_failure();
    let output = cmd.execute().await?;

    let stderr = output.stderr.trim();
    if !stderr.is_empty() || !output.status.success() {
        return Err(Error::tool_failed(
            cmd.program_name(),
            format!(
                "reading {} frames from {:?} at {}: {} ({})",
                request.count,
                input,
                format_seek_time(request.start_seconds()),
                stderr,
                output.status
            ),
        ));
    }

    PixelBuffer::from_raw(
        &output.stdout,
        request.count,
        options.height,
        options.width,
        options.pixel_format,
    )
}
