//! Stand-in `ffmpeg`/`ffprobe` executables for unit tests.
//!
//! Each fake is a `/bin/sh` script whose body is supplied by the test. The
//! scripts run with `DIR` set to the scratch directory and append their
//! arguments to `$DIR/calls.log`.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::tools::ToolRegistry;

pub struct FakeTools {
    ffmpeg: String,
    ffprobe: String,
}

pub struct FakeToolsDir {
    dir: TempDir,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            ffmpeg: "exit 0".to_string(),
            ffprobe: "exit 0".to_string(),
        }
    }

    pub fn ffmpeg(mut self, body: &str) -> Self {
        self.ffmpeg = body.to_string();
        self
    }

    pub fn ffprobe(mut self, body: &str) -> Self {
        self.ffprobe = body.to_string();
        self
    }

    pub fn build(self) -> FakeToolsDir {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "ffmpeg", &self.ffmpeg);
        write_script(dir.path(), "ffprobe", &self.ffprobe);
        FakeToolsDir { dir }
    }
}

impl FakeToolsDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn registry(&self) -> ToolRegistry {
        ToolRegistry::from_paths(self.dir.path().join("ffmpeg"), self.dir.path().join("ffprobe"))
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// One line per tool invocation, `<tool> <args...>`.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.file("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
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
