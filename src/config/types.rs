use mkv_extract_av::{ReadOptions, RawPixelFormat, VerifyOptions};
use serde::{Deserialize, Serialize};

pub use mkv_extract_av::ToolsConfig;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtractConfig {
    /// ffmpeg/ffprobe threads per export and for timestamp extraction
    #[serde(default = "default_extract_threads")]
    pub threads: usize,
}

fn default_extract_threads() -> usize {
    8
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            threads: default_extract_threads(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VerifyConfig {
    /// Frames compared per read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Frame rate used to seek exported files that report none
    #[serde(default = "default_fps")]
    pub fps: f64,

    #[serde(default = "default_verify_threads")]
    pub threads: usize,

    #[serde(default = "default_slices")]
    pub slices: usize,

    #[serde(default = "default_slice_crc")]
    pub slice_crc: bool,

    /// Raw sample layout for frame reads (`gray16le` or `gray`)
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
}

fn default_chunk_size() -> usize {
    100
}

fn default_fps() -> f64 {
    30.0
}

fn default_verify_threads() -> usize {
    6
}

fn default_slices() -> usize {
    24
}

fn default_slice_crc() -> bool {
    true
}

fn default_pixel_format() -> String {
    "gray16le".to_string()
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            fps: default_fps(),
            threads: default_verify_threads(),
            slices: default_slices(),
            slice_crc: default_slice_crc(),
            pixel_format: default_pixel_format(),
        }
    }
}

impl VerifyConfig {
    /// Verifier settings from this section; `delete` comes from the command
    /// line.
    pub fn to_options(&self, delete: bool) -> mkv_extract_av::Result<VerifyOptions> {
        let pixel_format: RawPixelFormat = self.pixel_format.parse()?;
        Ok(VerifyOptions {
            chunk_size: self.chunk_size,
            delete,
            read: ReadOptions {
                pixel_format,
                threads: self.threads,
                slices: self.slices,
                slice_crc: self.slice_crc,
                ..ReadOptions::default()
            },
            fallback_fps: self.fps,
        })
    }
}
