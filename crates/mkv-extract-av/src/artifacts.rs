//! Output paths for one recording, and atomic sidecar writes.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::streams::StreamKind;
use crate::{Error, Result};

/// The files produced for one container.
///
/// Every artifact path is `<prefix><suffix>`, where the prefix defaults to
/// the container path with its extension removed.
///
/// # Example
///
/// ```
/// use mkv_extract_av::{Artifacts, StreamKind};
/// use std::path::Path;
///
/// let artifacts = Artifacts::new("/data/session1/test.mkv", None)?;
/// assert_eq!(artifacts.metadata_path(), Path::new("/data/session1/test.metadata.json"));
/// assert_eq!(artifacts.stream_path(StreamKind::Depth), Path::new("/data/session1/test.depth.avi"));
/// # Ok::<(), mkv_extract_av::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    input: PathBuf,
    prefix: PathBuf,
}

impl Artifacts {
    /// Derive artifact paths for `input`, optionally under an explicit prefix.
    pub fn new<P: AsRef<Path>>(input: P, prefix: Option<&Path>) -> Result<Self> {
        let input = input.as_ref();
        if input.file_name().is_none() {
            return Err(Error::InvalidInput(format!(
                "Invalid container path: {:?}",
                input
            )));
        }

        let prefix = match prefix {
            Some(p) => p.to_path_buf(),
            None => input.with_extension(""),
        };

        Ok(Self {
            input: input.to_path_buf(),
            prefix,
        })
    }

    /// The container being extracted.
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// The output prefix.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// `<prefix>.metadata.json`
    pub fn metadata_path(&self) -> PathBuf {
        self.with_suffix(".metadata.json")
    }

    /// `<prefix>.timestamps.txt`
    pub fn timestamps_path(&self) -> PathBuf {
        self.with_suffix(".timestamps.txt")
    }

    /// `<prefix>.<stream>.<ext>`, the final location of an exported stream.
    pub fn stream_path(&self, kind: StreamKind) -> PathBuf {
        let profile = kind.profile();
        self.with_suffix(&format!(".{}.{}", kind.file_stem(), profile.extension))
    }

    /// Where ffmpeg writes a stream before it is known to be complete.
    ///
    /// The container extension stays last so ffmpeg still picks the muxer
    /// from it.
    pub fn partial_stream_path(&self, kind: StreamKind) -> PathBuf {
        let profile = kind.profile();
        self.with_suffix(&format!(
            ".{}.partial.{}",
            kind.file_stem(),
            profile.extension
        ))
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path = OsString::from(self.prefix.as_os_str());
        path.push(suffix);
        PathBuf::from(path)
    }
}

/// Whether an artifact counts as already produced.
///
/// Existing files are trusted without re-validation; a zero-byte file is
/// treated as absent.
pub fn is_complete(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Write `contents` to `path` through a temporary file in the same
/// directory, so readers never observe a half-written sidecar.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
