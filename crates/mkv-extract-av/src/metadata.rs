//! Container metadata and the embedded calibration attachment.
//!
//! The record written to `<prefix>.metadata.json` is ffprobe's
//! `-show_format -show_streams` output with the device calibration added
//! under `calibration`. Fields the tool relies on are typed; every other
//! ffprobe key is carried through untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::artifacts::write_atomic;
use crate::streams::StreamMap;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Container format, streams and calibration for one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub format: ContainerFormat,

    #[serde(default)]
    pub streams: Vec<StreamFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<Calibration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerFormat {
    pub format_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_streams: Option<u32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r_frame_rate: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamFormat {
    /// The stream's `title` tag (`COLOR`, `DEPTH`, `IR`, ...).
    pub fn title(&self) -> Option<&str> {
        self.tags.get("title").and_then(Value::as_str)
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.r_frame_rate.as_deref().and_then(parse_frame_rate)
    }
}

impl MetadataRecord {
    /// Duration of the container in seconds.
    pub fn duration_secs(&self) -> Option<f64> {
        self.format.duration.as_deref().and_then(|d| d.parse().ok())
    }

    /// The stream carrying a given `title` tag.
    pub fn stream_titled(&self, title: &str) -> Option<&StreamFormat> {
        self.streams.iter().find(|s| s.title() == Some(title))
    }

    /// Titled video streams as a [`StreamMap`], for when the container
    /// itself can no longer be probed.
    pub fn stream_map(&self) -> StreamMap {
        StreamMap::from_titles(
            self.streams
                .iter()
                .filter(|s| s.codec_type.as_deref() == Some("video"))
                .filter_map(|s| Some((s.title()?.to_string(), s.index as usize))),
        )
    }

    /// Pretty JSON with four-space indentation.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        Ok(out)
    }

    /// Write the sidecar atomically.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_json_pretty()?)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::file_not_found(path)
            } else {
                Error::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Device calibration stored as a JSON attachment in the container.
///
/// Must be a JSON object. Azure Kinect recordings carry
/// `CalibrationInformation.Cameras`; those entries are typed, the rest is
/// preserved as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(
        rename = "CalibrationInformation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub information: Option<CalibrationInformation>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInformation {
    #[serde(rename = "Cameras", default, skip_serializing_if = "Vec::is_empty")]
    pub cameras: Vec<CameraCalibration>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    #[serde(rename = "Location", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(rename = "Purpose", default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,

    #[serde(rename = "SensorWidth", default, skip_serializing_if = "Option::is_none")]
    pub sensor_width: Option<u32>,

    #[serde(rename = "SensorHeight", default, skip_serializing_if = "Option::is_none")]
    pub sensor_height: Option<u32>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Calibration {
    /// Parse an attachment payload. Anything other than a JSON object is
    /// rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::parse_error(
                "ffmpeg",
                "container has no calibration attachment",
            ));
        }

        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            Error::parse_error("ffmpeg", format!("calibration is not valid JSON: {}", e))
        })?;
        if !value.is_object() {
            return Err(Error::parse_error(
                "ffmpeg",
                "calibration attachment is not a JSON object",
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The camera entry for a sensor location such as `CALIBRATION_CameraLocationD0`.
    pub fn camera(&self, location: &str) -> Option<&CameraCalibration> {
        self.information
            .as_ref()?
            .cameras
            .iter()
            .find(|c| c.location.as_deref() == Some(location))
    }
}

/// Run ffprobe's format/stream introspection.
pub async fn probe_format(tools: &ToolRegistry, input: &Path) -> Result<MetadataRecord> {
    let mut cmd = tools.ffprobe()?;
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(input);

    let output = cmd.execute().await?;
    serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::parse_error("ffprobe", format!("format/stream JSON: {}", e)))
}

/// Dump attachment 0 to stdout and parse it as calibration.
///
/// ffmpeg exits non-zero here because no output file is named, so the exit
/// status is ignored and the payload decides.
pub async fn extract_calibration(tools: &ToolRegistry, input: &Path) -> Result<Calibration> {
    let mut cmd = tools.ffmpeg()?;
    cmd.args(["-nostdin", "-dump_attachment:t:0", "pipe:1", "-i"])
        .arg(input)
        .allow_failure();

    let output = cmd.execute().await?;
    Calibration::from_bytes(&output.stdout)
}

/// Format/stream introspection plus calibration, as one record.
pub async fn extract_metadata(tools: &ToolRegistry, input: &Path) -> Result<MetadataRecord> {
    let mut record = probe_format(tools, input).await?;
    record.calibration = Some(extract_calibration(tools, input).await?);
    Ok(record)
}

/// Parse an ffprobe rate such as `30/1` or `24000/1001`.
pub fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let parts: Vec<&str> = rate_str.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den != 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate_str.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTools;
    use tempfile::tempdir;

    const FFPROBE_JSON: &str = r#"{
        "streams": [
            {"index": 0, "codec_name": "mjpeg", "codec_type": "video", "width": 1280, "height": 720,
             "r_frame_rate": "30/1", "tags": {"title": "COLOR", "mimetype": "video/x-raw"}},
            {"index": 1, "codec_name": "rawvideo", "codec_type": "video", "width": 640, "height": 576,
             "r_frame_rate": "30/1", "pix_fmt": "gray16be", "tags": {"title": "DEPTH"}},
            {"index": 2, "codec_type": "attachment", "tags": {"filename": "calibration.json"}}
        ],
        "format": {"filename": "test.mkv", "nb_streams": 3, "format_name": "matroska,webm",
                   "duration": "8.333333", "size": "1048576", "tags": {"K4A_DEPTH_MODE": "NFOV_UNBINNED"}}
    }"#;

    const CALIBRATION_JSON: &str = r#"{
        "CalibrationInformation": {
            "Cameras": [
                {"Location": "CALIBRATION_CameraLocationD0", "Purpose": "CALIBRATION_CameraPurposeDepth",
                 "SensorWidth": 1024, "SensorHeight": 1024,
                 "Intrinsics": {"ModelParameterCount": 14, "ModelParameters": [0.5, 0.5]}}
            ],
            "Metadata": {"SerialId": "000123"}
        }
    }"#;

    #[test]
    fn typed_fields_and_extras_survive() {
        let record: MetadataRecord = serde_json::from_str(FFPROBE_JSON).unwrap();
        assert_eq!(record.format.format_name, "matroska,webm");
        assert_eq!(record.duration_secs(), Some(8.333333));
        assert_eq!(record.format.extra["filename"], "test.mkv");
        assert_eq!(record.streams.len(), 3);

        let depth = record.stream_titled("DEPTH").unwrap();
        assert_eq!(depth.index, 1);
        assert_eq!((depth.width, depth.height), (Some(640), Some(576)));
        assert_eq!(depth.frame_rate(), Some(30.0));
        assert_eq!(depth.extra["pix_fmt"], "gray16be");
        assert!(record.calibration.is_none());

        let json: Value = serde_json::from_slice(&record.to_json_pretty().unwrap()).unwrap();
        let original: Value = serde_json::from_str(FFPROBE_JSON).unwrap();
        assert_eq!(json, original);
    }

    #[test]
    fn stream_map_comes_from_titled_video_streams() {
        let record: MetadataRecord = serde_json::from_str(FFPROBE_JSON).unwrap();
        let map = record.stream_map();
        assert_eq!(map.get("COLOR"), Some(0));
        assert_eq!(map.get("DEPTH"), Some(1));
        assert_eq!(map.len(), 2);

        let untitled = MetadataRecord {
            streams: Vec::new(),
            ..record
        };
        assert_eq!(untitled.stream_map(), StreamMap::fallback());
    }

    #[test]
    fn pretty_json_uses_four_space_indent() {
        let record: MetadataRecord = serde_json::from_str(FFPROBE_JSON).unwrap();
        let text = String::from_utf8(record.to_json_pretty().unwrap()).unwrap();
        assert!(text.starts_with("{\n    \"format\": {\n        \""), "{text}");
    }

    #[test]
    fn calibration_is_typed_and_validated() {
        let cal = Calibration::from_bytes(CALIBRATION_JSON.as_bytes()).unwrap();
        let depth = cal.camera("CALIBRATION_CameraLocationD0").unwrap();
        assert_eq!(depth.sensor_width, Some(1024));
        assert_eq!(depth.extra["Intrinsics"]["ModelParameterCount"], 14);
        assert_eq!(
            cal.information.as_ref().unwrap().extra["Metadata"]["SerialId"],
            "000123"
        );

        assert!(Calibration::from_bytes(b"").is_err());
        assert!(Calibration::from_bytes(b" \n").is_err());
        assert!(Calibration::from_bytes(b"{not json").is_err());
        assert!(Calibration::from_bytes(b"[1, 2, 3]").is_err());
        assert!(Calibration::from_bytes(b"{}").is_ok());
    }

    #[test]
    fn sidecar_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.metadata.json");
        let mut record: MetadataRecord = serde_json::from_str(FFPROBE_JSON).unwrap();
        record.calibration = Some(Calibration::from_bytes(CALIBRATION_JSON.as_bytes()).unwrap());

        record.write_to(&path).unwrap();
        assert_eq!(MetadataRecord::read_from(&path).unwrap(), record);
        assert!(matches!(
            MetadataRecord::read_from(&dir.path().join("missing.json")),
            Err(Error::FileNotFound { .. })
        ));
    }

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("24000/1001"), Some(23.976023976023978));
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("invalid"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn extract_metadata_combines_probe_and_attachment() {
        let fake = FakeTools::new()
            .ffprobe("cat \"$DIR/probe.json\"")
            .ffmpeg(
                "cat \"$DIR/calibration.json\"; \
                 echo 'At least one output file must be specified' >&2; exit 1",
            )
            .build();
        std::fs::write(fake.file("probe.json"), FFPROBE_JSON).unwrap();
        std::fs::write(fake.file("calibration.json"), CALIBRATION_JSON).unwrap();

        let record = extract_metadata(&fake.registry(), Path::new("test.mkv"))
            .await
            .unwrap();
        assert!(record.calibration.is_some());
        assert_eq!(record.streams.len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bad_calibration_fails_extraction() {
        let fake = FakeTools::new()
            .ffprobe("echo '{\"format\": {\"format_name\": \"matroska,webm\"}, \"streams\": []}'")
            .ffmpeg("echo 'not json'; exit 1")
            .build();
        let result = extract_metadata(&fake.registry(), Path::new("test.mkv")).await;
        assert!(matches!(result, Err(Error::ParseError { .. })));
    }
}
