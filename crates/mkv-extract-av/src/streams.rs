//! Stream detection and per-stream export profiles.
//!
//! Depth-camera recordings tag each video track with a `title` such as
//! `COLOR`, `DEPTH` or `IR`. [`inspect_streams`] maps those tags to stream
//! indices; [`StreamKind::profile`] says how each kind is re-encoded.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tools::ToolRegistry;
use crate::Error;

/// The stream kinds this tool knows how to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamKind {
    Color,
    Depth,
    Ir,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Color, StreamKind::Depth, StreamKind::Ir];

    /// The container tag value, e.g. `DEPTH`.
    pub fn tag(&self) -> &'static str {
        match self {
            StreamKind::Color => "COLOR",
            StreamKind::Depth => "DEPTH",
            StreamKind::Ir => "IR",
        }
    }

    /// The lowercase name used in output file names.
    pub fn file_stem(&self) -> &'static str {
        match self {
            StreamKind::Color => "color",
            StreamKind::Depth => "depth",
            StreamKind::Ir => "ir",
        }
    }

    /// Export settings for this stream kind.
    pub fn profile(&self) -> &'static StreamProfile {
        match self {
            StreamKind::Color => &COLOR_PROFILE,
            StreamKind::Depth => &DEPTH_PROFILE,
            StreamKind::Ir => &IR_PROFILE,
        }
    }

    /// Whether exports of this kind are lossless and can be checked
    /// pixel-for-pixel against the container.
    pub fn is_verifiable(&self) -> bool {
        matches!(self, StreamKind::Depth | StreamKind::Ir)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for StreamKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COLOR" => Ok(StreamKind::Color),
            "DEPTH" => Ok(StreamKind::Depth),
            "IR" => Ok(StreamKind::Ir),
            other => Err(Error::UnknownStream(other.to_string())),
        }
    }
}

/// How one stream kind is re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProfile {
    pub extension: &'static str,
    pub codec: &'static str,
    pub pixel_format: &'static str,
    /// Value passed to `-crf`.
    pub quality: &'static str,
}

const COLOR_PROFILE: StreamProfile = StreamProfile {
    extension: "mp4",
    codec: "h264",
    pixel_format: "rgb24",
    quality: "24",
};

const DEPTH_PROFILE: StreamProfile = StreamProfile {
    extension: "avi",
    codec: "ffv1",
    pixel_format: "gray16",
    quality: "10",
};

const IR_PROFILE: StreamProfile = StreamProfile {
    extension: "avi",
    codec: "ffv1",
    pixel_format: "gray16",
    quality: "18",
};

/// One tagged stream in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub tag: String,
    pub index: usize,
}

impl StreamEntry {
    /// The known kind for this tag, or [`Error::UnknownStream`].
    pub fn kind(&self) -> Result<StreamKind, Error> {
        self.tag.parse()
    }
}

/// Stream tags mapped to stream indices, in container order.
///
/// Never empty: a container without tags maps `DEPTH` to stream 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMap {
    entries: Vec<StreamEntry>,
}

impl StreamMap {
    /// The mapping used when no tags can be read.
    pub fn fallback() -> Self {
        Self {
            entries: vec![StreamEntry {
                tag: StreamKind::Depth.tag().to_string(),
                index: 0,
            }],
        }
    }

    /// Build a map from ffprobe's one-tag-per-line output.
    ///
    /// The line number is the stream index. A repeated tag keeps its first
    /// position and takes the later index. Output with no tags yields the
    /// fallback.
    pub fn from_tag_lines(output: &str) -> Self {
        Self::from_titles(
            output
                .trim_end_matches('\n')
                .split('\n')
                .enumerate()
                .map(|(index, line)| (line.trim_end_matches('\r'), index))
                .filter(|(tag, _)| !tag.is_empty()),
        )
    }

    /// Build a map from `(tag, index)` pairs, with the same duplicate and
    /// empty handling as [`StreamMap::from_tag_lines`].
    pub fn from_titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut entries: Vec<StreamEntry> = Vec::new();
        for (tag, index) in titles {
            let tag = tag.into();
            match entries.iter_mut().find(|e| e.tag == tag) {
                Some(existing) => existing.index = index,
                None => entries.push(StreamEntry { tag, index }),
            }
        }

        if entries.is_empty() {
            return Self::fallback();
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stream index for a raw tag.
    pub fn get(&self, tag: &str) -> Option<usize> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| e.index)
    }

    /// Stream index for a known kind.
    pub fn index_of(&self, kind: StreamKind) -> Option<usize> {
        self.get(kind.tag())
    }

    /// Known streams with their indices, in container order.
    pub fn known(&self) -> impl Iterator<Item = (StreamKind, usize)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.kind().ok().map(|k| (k, e.index)))
    }

    /// Tags with no export profile.
    pub fn unknown_tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries
            .iter()
            .filter(|e| e.kind().is_err())
            .map(|e| e.tag.as_str())
    }
}

/// Detect the tagged streams in a container.
///
/// Probe failures are not errors: untagged single-stream files are common,
/// so anything other than a clean, non-empty answer gives
/// [`StreamMap::fallback`].
pub async fn inspect_streams(tools: &ToolRegistry, input: &Path) -> StreamMap {
    let mut cmd = match tools.ffprobe() {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::debug!("Stream probe unavailable ({}), assuming a single DEPTH stream", e);
            return StreamMap::fallback();
        }
    };

    cmd.args([
        "-v",
        "fatal",
        "-show_entries",
        "stream_tags=title",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ])
    .arg(input)
    .allow_failure();

    match cmd.execute().await {
        Ok(output) if output.status.success() && output.stderr.trim().is_empty() => {
            StreamMap::from_tag_lines(&output.stdout_lossy())
        }
        Ok(output) => {
            tracing::debug!(
                "Stream probe of {:?} reported {}: {}; assuming a single DEPTH stream",
                input,
                output.status,
                output.stderr.trim()
            );
            StreamMap::fallback()
        }
        Err(e) => {
            tracing::debug!("Stream probe of {:?} failed: {}; assuming a single DEPTH stream", input, e);
            StreamMap::fallback()
        }
    }
}
