//! Shared test harness for integration tests.
//!
//! [`FakeRecording`] lays out a scratch directory holding `test.mkv` and
//! stand-in `ffmpeg`/`ffprobe` shell scripts that behave like the real tools
//! on a 250-frame recording with DEPTH and IR streams of 4x2 gray16 frames.
//! Every invocation is appended to `calls.log`.
//!
//! Behaviour switches, as marker files in the directory:
//! - `tags`: replaces the stream tag listing
//! - `fail.<stream>`: that stream's export exits with status 1
//! - `corrupt.<stream>`: frames read back from that export are all zeros
//! - `late.<stream>`: frames read back from that export are one frame ahead
//!
//! Every sample of frame `i` reads as `i % 127 + 1`; the frame number comes
//! from `-ss` at 30 fps, which holds for both the container timestamps and
//! the exported files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use mkv_extract_av::ToolRegistry;
use tempfile::TempDir;

pub const FRAMES: usize = 250;

const FFPROBE: &str = r##"case "$*" in
  -version)
    echo 'ffprobe version 6.1-fake'
    ;;
  *stream_tags=title*)
    if [ -f "$DIR/tags" ]; then cat "$DIR/tags"; else printf 'DEPTH\nIR\n'; fi
    ;;
  *-show_format*)
    cat <<'EOF'
{
  "streams": [
    {"index": 0, "codec_name": "ffv1", "codec_type": "video", "width": 4, "height": 2,
     "r_frame_rate": "30/1", "tags": {"title": "DEPTH"}},
    {"index": 1, "codec_name": "ffv1", "codec_type": "video", "width": 4, "height": 2,
     "r_frame_rate": "30/1", "tags": {"title": "IR"}},
    {"index": 2, "codec_name": "none", "codec_type": "attachment",
     "tags": {"filename": "calibration.json", "mimetype": "application/octet-stream"}}
  ],
  "format": {"filename": "test.mkv", "nb_streams": 3, "format_name": "matroska,webm",
             "duration": "8.333333", "size": "4096"}
}
EOF
    ;;
  *frame=*)
    awk 'BEGIN { printf "{\"frames\": ["; for (i = 0; i < 250; i++) printf "%s{\"pts_time\": \"%.6f\"}", (i ? ", " : ""), i / 30; print "]}" }'
    ;;
  *nb_frames*)
    echo '{"streams": [{"width": 4, "height": 2, "nb_frames": "250", "r_frame_rate": "30/1"}]}'
    ;;
esac"##;

const FFMPEG: &str = r##"case "$*" in
  -version)
    echo 'ffmpeg version 6.1-fake'
    ;;
  *-dump_attachment*)
    echo '{"CalibrationInformation": {"Cameras": [{"Location": "CALIBRATION_CameraLocationD0", "Purpose": "CALIBRATION_CameraPurposeDepth", "SensorWidth": 1024, "SensorHeight": 1024}]}}'
    echo 'At least one output file must be specified' >&2
    exit 1
    ;;
  *image2pipe*)
    n=1; prev=''; src=''; ss='0:0:0'
    for a; do
      [ "$prev" = "-vframes" ] && n=$a
      [ "$prev" = "-i" ] && src=$a
      [ "$prev" = "-ss" ] && ss=$a
      prev=$a
    done
    late=0
    for kind in depth ir; do
      case "$src" in
        *."$kind".avi)
          if [ -f "$DIR/corrupt.$kind" ]; then head -c $((n * 16)) /dev/zero; exit 0; fi
          if [ -f "$DIR/late.$kind" ]; then late=1; fi
          ;;
      esac
    done
    LC_ALL=C awk -v ss="$ss" -v n="$n" -v late="$late" 'BEGIN {
      split(ss, t, ":"); first = int((t[1] * 3600 + t[2] * 60 + t[3]) * 30 + 0.5) + late
      for (k = 0; k < n; k++) for (j = 0; j < 16; j++) printf "%c", (first + k) % 127 + 1
    }'
    ;;
  *)
    for last; do :; done
    for kind in color depth ir; do
      case "$last" in
        *."$kind".partial.*)
          if [ -f "$DIR/fail.$kind" ]; then echo 'Conversion failed!' >&2; exit 1; fi
          ;;
      esac
    done
    printf 'encoded %s\n' "$last" > "$last"
    ;;
esac"##;

/// A scratch recording plus fake tools.
pub struct FakeRecording {
    dir: TempDir,
}

impl FakeRecording {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "ffprobe", FFPROBE);
        write_script(dir.path(), "ffmpeg", FFMPEG);
        std::fs::write(dir.path().join("test.mkv"), b"matroska").unwrap();
        Self { dir }
    }

    /// Replace the stream tags reported for the container.
    pub fn with_tags(self, tags: &str) -> Self {
        std::fs::write(self.file("tags"), tags).unwrap();
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn input(&self) -> PathBuf {
        self.file("test.mkv")
    }

    pub fn registry(&self) -> ToolRegistry {
        ToolRegistry::from_paths(self.file("ffmpeg"), self.file("ffprobe"))
    }

    /// Make later exports of `stream` (`depth`, `ir`, `color`) fail.
    pub fn fail_export(&self, stream: &str) {
        std::fs::write(self.file(&format!("fail.{stream}")), b"").unwrap();
    }

    /// Make frames read back from the `stream` export differ from the
    /// container.
    pub fn corrupt(&self, stream: &str) {
        std::fs::write(self.file(&format!("corrupt.{stream}")), b"").unwrap();
    }

    /// Make frames read back from the `stream` export one frame ahead of
    /// the container.
    pub fn shift_by_one_frame(&self, stream: &str) {
        std::fs::write(self.file(&format!("late.{stream}")), b"").unwrap();
    }

    /// A config file pointing at the fake tools.
    pub fn write_config(&self) -> PathBuf {
        let path = self.file("mkv-extract.toml");
        let contents = format!(
            "[tools]\nffmpeg_path = {:?}\nffprobe_path = {:?}\n\n[verify]\nchunk_size = 100\n",
            self.file("ffmpeg").display().to_string(),
            self.file("ffprobe").display().to_string(),
        );
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// One line per tool invocation, `<tool> <args...>`.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.file("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\nDIR='{}'\necho \"{} $*\" >> \"$DIR/calls.log\"\n{}\n",
        dir.display(),
        name,
        body
    );
    std::fs::write(&path, script).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
