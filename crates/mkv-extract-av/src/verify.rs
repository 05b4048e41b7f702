//! Sample-exact comparison of exported streams against their container.
//!
//! Each verifiable stream is compared in chunks: the container side is
//! addressed by the recorded frame timestamps, the exported side by frame
//! index. Only when every stream matches may the container be deleted.

use std::ops::Range;
use std::path::PathBuf;

use crate::artifacts::Artifacts;
use crate::frames::{read_frames, FrameRequest, ReadOptions, StreamSelector};
use crate::probe::probe_video_stream;
use crate::streams::{inspect_streams, StreamKind, StreamMap};
use crate::timestamps::read_timestamps;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// How verification runs and what happens afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOptions {
    /// Frames compared per read.
    pub chunk_size: usize,
    /// Remove the container once every stream verifies.
    pub delete: bool,
    /// Geometry and decoder tuning; geometry is replaced by what the
    /// exported file reports when available.
    pub read: ReadOptions,
    /// Frame rate for index seeking when the exported file reports none.
    pub fallback_fps: f64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            delete: false,
            read: ReadOptions::default(),
            fallback_fps: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamVerdict {
    /// Every frame matched.
    Verified { frames: usize },
    /// The exported file does not exist.
    Missing { path: PathBuf },
    /// These chunk indices differ.
    Mismatch { chunks: Vec<usize> },
    /// The export holds `found` frames where the container recorded
    /// `expected`.
    LengthMismatch { expected: usize, found: usize },
    /// The container is gone, so there is nothing to compare against.
    SourceGone,
}

impl StreamVerdict {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StreamVerdict::Missing { .. }
                | StreamVerdict::Mismatch { .. }
                | StreamVerdict::LengthMismatch { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCheck {
    pub kind: StreamKind,
    pub verdict: StreamVerdict,
}

/// Outcome of verifying one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub streams: Vec<StreamCheck>,
    pub passed: bool,
    pub deleted: bool,
}

impl IntegrityReport {
    pub fn verdict(&self, kind: StreamKind) -> Option<&StreamVerdict> {
        self.streams
            .iter()
            .find(|s| s.kind == kind)
            .map(|s| &s.verdict)
    }
}

/// Split `0..len` into `ceil(len / chunk)` consecutive ranges; the last one
/// holds the remainder.
pub fn chunk_ranges(len: usize, chunk: usize) -> Vec<Range<usize>> {
    if chunk == 0 {
        return Vec::new();
    }
    (0..len.div_ceil(chunk))
        .map(|i| i * chunk..((i + 1) * chunk).min(len))
        .collect()
}

/// Verify every DEPTH and IR export of `artifacts` and delete the container
/// if requested and warranted.
///
/// Stream tags are read from the container itself. Use [`verify_streams`]
/// when a [`StreamMap`] was already built for it.
pub async fn verify_extraction(
    tools: &ToolRegistry,
    artifacts: &Artifacts,
    options: &VerifyOptions,
) -> Result<IntegrityReport> {
    let streams: Vec<(StreamKind, usize)> = if artifacts.input().exists() {
        inspect_streams(tools, artifacts.input())
            .await
            .known()
            .filter(|(kind, _)| kind.is_verifiable())
            .collect()
    } else {
        StreamKind::ALL
            .into_iter()
            .filter(StreamKind::is_verifiable)
            .map(|kind| (kind, 0))
            .collect()
    };
    verify_kinds(tools, artifacts, streams, options).await
}

/// Verify the DEPTH and IR streams of `streams` without probing the
/// container again.
///
/// A missing export or a frame count that differs from the timestamp
/// sidecar is recorded and checking carries on. Probe and frame read
/// failures are errors, and the container is never deleted on an error.
pub async fn verify_streams(
    tools: &ToolRegistry,
    artifacts: &Artifacts,
    streams: &StreamMap,
    options: &VerifyOptions,
) -> Result<IntegrityReport> {
    let streams = streams
        .known()
        .filter(|(kind, _)| kind.is_verifiable())
        .collect();
    verify_kinds(tools, artifacts, streams, options).await
}

async fn verify_kinds(
    tools: &ToolRegistry,
    artifacts: &Artifacts,
    streams: Vec<(StreamKind, usize)>,
    options: &VerifyOptions,
) -> Result<IntegrityReport> {
    if options.chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".to_string()));
    }

    let input = artifacts.input();
    let source_present = input.exists();
    if !source_present {
        tracing::info!("{:?} no longer exists; skipping comparison", input);
    }

    let mut timestamps: Option<Vec<f64>> = None;
    let mut checks = Vec::with_capacity(streams.len());

    for (kind, index) in streams {
        let exported = artifacts.stream_path(kind);

        let verdict = if !source_present {
            StreamVerdict::SourceGone
        } else if !exported.exists() {
            tracing::error!("{} export {:?} is missing", kind, exported);
            StreamVerdict::Missing { path: exported }
        } else {
            if timestamps.is_none() {
                timestamps = Some(read_timestamps(&artifacts.timestamps_path())?);
            }
            let series = timestamps.as_deref().unwrap_or_default();
            compare_stream(tools, artifacts, kind, index, series, options).await?
        };

        checks.push(StreamCheck { kind, verdict });
    }

    let passed = !checks.iter().any(|c| c.verdict.is_failure());
    let mut deleted = false;

    if !passed {
        tracing::error!("Integrity check failed for {:?}; keeping it", input);
    } else if options.delete && source_present {
        std::fs::remove_file(input)?;
        tracing::info!("Integrity verified, removed {:?}", input);
        deleted = true;
    } else {
        tracing::info!("Integrity verified for {:?}", input);
    }

    Ok(IntegrityReport {
        streams: checks,
        passed,
        deleted,
    })
}

async fn compare_stream(
    tools: &ToolRegistry,
    artifacts: &Artifacts,
    kind: StreamKind,
    index: usize,
    timestamps: &[f64],
    options: &VerifyOptions,
) -> Result<StreamVerdict> {
    let exported = artifacts.stream_path(kind);
    let info = probe_video_stream(tools, &exported).await?;

    if timestamps.len() != info.frame_count {
        tracing::error!(
            "{:?} has {} frames but {} timestamps were recorded",
            exported,
            info.frame_count,
            timestamps.len()
        );
        return Ok(StreamVerdict::LengthMismatch {
            expected: timestamps.len(),
            found: info.frame_count,
        });
    }

    let mut read = options.read.clone();
    read.width = info.width.unwrap_or(read.width);
    read.height = info.height.unwrap_or(read.height);
    let fps = info
        .frame_rate
        .filter(|r| *r > 0.0)
        .unwrap_or(options.fallback_fps);

    let chunks = chunk_ranges(info.frame_count, options.chunk_size);
    tracing::info!(
        "Verifying {} ({} frames, {}x{}) in {} chunks",
        kind,
        info.frame_count,
        read.width,
        read.height,
        chunks.len()
    );

    let mut mismatched = Vec::new();
    for (n, range) in chunks.into_iter().enumerate() {
        let original = read_frames(
            tools,
            artifacts.input(),
            &FrameRequest::by_timestamps(&timestamps[range.clone()]),
            &StreamSelector::Index(index),
            &read,
        )
        .await?;
        let copy = read_frames(
            tools,
            &exported,
            &FrameRequest::by_index(range.clone(), fps),
            &StreamSelector::Index(0),
            &read,
        )
        .await?;

        if let Some(at) = original.first_mismatch(&copy) {
            tracing::error!(
                "{} chunk {} (frames {}..{}) differs at frame {}, row {}, col {}",
                kind,
                n,
                range.start,
                range.end,
                range.start + at.frame,
                at.row,
                at.col
            );
            mismatched.push(n);
        } else {
            tracing::debug!("{} chunk {} matches", kind, n);
        }
    }

    Ok(if mismatched.is_empty() {
        StreamVerdict::Verified {
            frames: info.frame_count,
        }
    } else {
        StreamVerdict::Mismatch { chunks: mismatched }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeTools, FakeToolsDir};

    #[test]
    fn chunks_cover_every_frame_once() {
        assert_eq!(chunk_ranges(250, 100), vec![0..100, 100..200, 200..250]);
        assert_eq!(chunk_ranges(200, 100), vec![0..100, 100..200]);
        assert_eq!(chunk_ranges(7, 100), vec![0..7]);
        assert!(chunk_ranges(0, 100).is_empty());
        assert!(chunk_ranges(10, 0).is_empty());
    }

    // 2x2 gray16le frames whose samples all equal `frame % 127 + 1`. The
    // container is timestamped at 10 fps, exports play back at 30 fps, so
    // the frame number is recovered from `-ss` at the rate of the source.
    // `$DIR/corrupt` makes exports read as zeros, `$DIR/late` makes them one
    // frame ahead of the container.
    const FFMPEG_READER: &str = r#"n=1; prev=''; src=''; ss='0:0:0'
for a; do
  [ "$prev" = "-vframes" ] && n=$a
  [ "$prev" = "-i" ] && src=$a
  [ "$prev" = "-ss" ] && ss=$a
  prev=$a
done
rate=10; late=0
case "$src" in
  *.avi)
    rate=30
    if [ -f "$DIR/corrupt" ]; then head -c $((n * 8)) /dev/zero; exit 0; fi
    if [ -f "$DIR/late" ]; then late=1; fi
    ;;
esac
LC_ALL=C awk -v ss="$ss" -v n="$n" -v rate="$rate" -v late="$late" 'BEGIN {
  split(ss, t, ":"); first = int((t[1] * 3600 + t[2] * 60 + t[3]) * rate + 0.5) + late
  for (k = 0; k < n; k++) for (j = 0; j < 8; j++) printf "%c", (first + k) % 127 + 1
}'"#;

    // Exports report `$DIR/nb_frames` frames, 5 by default.
    const FFPROBE: &str = r#"case "$*" in
  *stream_tags=title*) printf 'DEPTH\nIR\n';;
  *)
    n=5; if [ -f "$DIR/nb_frames" ]; then n=$(cat "$DIR/nb_frames"); fi
    printf '{"streams": [{"width": 2, "height": 2, "nb_frames": "%s", "r_frame_rate": "30/1"}]}\n' "$n"
    ;;
esac"#;

    fn recording(fake: &FakeToolsDir) -> Artifacts {
        let artifacts = Artifacts::new(fake.file("test.mkv"), None).unwrap();
        std::fs::write(artifacts.input(), b"mkv").unwrap();
        std::fs::write(artifacts.stream_path(StreamKind::Depth), b"avi").unwrap();
        std::fs::write(artifacts.stream_path(StreamKind::Ir), b"avi").unwrap();
        std::fs::write(artifacts.timestamps_path(), "0.0\n0.1\n0.2\n0.3\n0.4").unwrap();
        artifacts
    }

    fn options(delete: bool) -> VerifyOptions {
        VerifyOptions {
            chunk_size: 2,
            delete,
            ..Default::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn matching_exports_allow_deletion() {
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(FFPROBE).build();
        let artifacts = recording(&fake);

        let report = verify_extraction(&fake.registry(), &artifacts, &options(true))
            .await
            .unwrap();

        assert!(report.passed);
        assert!(report.deleted);
        assert!(!artifacts.input().exists());
        assert_eq!(
            report.verdict(StreamKind::Depth),
            Some(&StreamVerdict::Verified { frames: 5 })
        );

        // 3 chunks per stream, one read of each side per chunk.
        let reads = fake.calls().iter().filter(|c| c.starts_with("ffmpeg")).count();
        assert_eq!(reads, 2 * 3 * 2);
        let calls = fake.calls();
        let last_chunk = calls
            .iter()
            .find(|c| c.starts_with("ffmpeg") && c.contains("test.mkv") && c.contains("-ss 0:00:00.400000"))
            .unwrap();
        assert!(last_chunk.contains("-vframes 1"), "{last_chunk}");
        assert!(last_chunk.contains("-s 2x2"), "{last_chunk}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn corrupted_export_keeps_container() {
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(FFPROBE).build();
        let artifacts = recording(&fake);
        std::fs::write(fake.file("corrupt"), b"").unwrap();

        let report = verify_extraction(&fake.registry(), &artifacts, &options(true))
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(!report.deleted);
        assert!(artifacts.input().exists());
        assert_eq!(
            report.verdict(StreamKind::Ir),
            Some(&StreamVerdict::Mismatch { chunks: vec![0, 1, 2] })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_export_fails_but_other_streams_are_checked() {
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(FFPROBE).build();
        let artifacts = recording(&fake);
        std::fs::remove_file(artifacts.stream_path(StreamKind::Depth)).unwrap();

        let report = verify_extraction(&fake.registry(), &artifacts, &options(true))
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(artifacts.input().exists());
        assert!(matches!(
            report.verdict(StreamKind::Depth),
            Some(StreamVerdict::Missing { .. })
        ));
        assert_eq!(
            report.verdict(StreamKind::Ir),
            Some(&StreamVerdict::Verified { frames: 5 })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gone_container_is_skipped() {
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(FFPROBE).build();
        let artifacts = recording(&fake);
        std::fs::remove_file(artifacts.input()).unwrap();

        let report = verify_extraction(&fake.registry(), &artifacts, &options(true))
            .await
            .unwrap();

        assert!(report.passed);
        assert!(!report.deleted);
        assert!(report
            .streams
            .iter()
            .all(|s| s.verdict == StreamVerdict::SourceGone));
        assert!(fake.calls().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn export_one_frame_late_is_a_mismatch() {
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(FFPROBE).build();
        let artifacts = recording(&fake);
        std::fs::write(fake.file("late"), b"").unwrap();

        let report = verify_extraction(&fake.registry(), &artifacts, &options(true))
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(artifacts.input().exists());
        assert_eq!(
            report.verdict(StreamKind::Depth),
            Some(&StreamVerdict::Mismatch { chunks: vec![0, 1, 2] })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn truncated_export_keeps_container() {
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(FFPROBE).build();
        let artifacts = recording(&fake);
        std::fs::write(fake.file("nb_frames"), "3").unwrap();

        let report = verify_extraction(&fake.registry(), &artifacts, &options(true))
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(!report.deleted);
        assert!(artifacts.input().exists());
        assert_eq!(
            report.verdict(StreamKind::Depth),
            Some(&StreamVerdict::LengthMismatch {
                expected: 5,
                found: 3
            })
        );
        assert_eq!(
            report.verdict(StreamKind::Ir),
            Some(&StreamVerdict::LengthMismatch {
                expected: 5,
                found: 3
            })
        );
        assert_eq!(fake.calls().iter().filter(|c| c.starts_with("ffmpeg")).count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn short_timestamp_sidecar_keeps_container() {
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(FFPROBE).build();
        let artifacts = recording(&fake);
        std::fs::write(artifacts.timestamps_path(), "0.0\n0.1").unwrap();

        let report = verify_extraction(&fake.registry(), &artifacts, &options(true))
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(artifacts.input().exists());
        assert_eq!(
            report.verdict(StreamKind::Ir),
            Some(&StreamVerdict::LengthMismatch {
                expected: 2,
                found: 5
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn known_stream_map_is_not_probed_again() {
        // Tag queries answer with a warning, which would degrade to DEPTH only.
        let ffprobe = FFPROBE.replace(
            "*stream_tags=title*) printf 'DEPTH\\nIR\\n';;",
            "*stream_tags=title*) printf 'DEPTH\\nIR\\n'; echo 'warning' >&2;;",
        );
        let fake = FakeTools::new().ffmpeg(FFMPEG_READER).ffprobe(&ffprobe).build();
        let artifacts = recording(&fake);
        std::fs::remove_file(artifacts.stream_path(StreamKind::Ir)).unwrap();
        let streams = StreamMap::from_tag_lines("DEPTH\nIR\n");

        let report = verify_streams(&fake.registry(), &artifacts, &streams, &options(true))
            .await
            .unwrap();

        assert!(!report.passed);
        assert!(artifacts.input().exists());
        assert!(matches!(
            report.verdict(StreamKind::Ir),
            Some(StreamVerdict::Missing { .. })
        ));
        assert!(!fake.calls().iter().any(|c| c.contains("stream_tags")));
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let streams: Vec<(StreamKind, usize)> = Vec::new();
        let artifacts = Artifacts::new("test.mkv", None).unwrap();
        let options = VerifyOptions {
            chunk_size: 0,
            ..Default::default()
        };
        let tools = ToolRegistry::from_paths("ffmpeg", "ffprobe");
        let result = verify_kinds(&tools, &artifacts, streams, &options).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
