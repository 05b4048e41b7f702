//! Re-encoding each detected stream into its own file.
//!
//! [`ExportGroup`] starts one ffmpeg process per stream, all before waiting
//! on any of them, then joins every process and reports each stream's
//! outcome individually.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;

use crate::artifacts::Artifacts;
use crate::command::{RunningTool, ToolCommand};
use crate::streams::{StreamKind, StreamMap};
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Tuning for stream exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Encoder threads per stream.
    pub threads: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { threads: 8 }
    }
}

/// How one stream's export ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Written and moved to its final path.
    Exported { path: PathBuf },
    /// ffmpeg could not be started or exited unsuccessfully.
    Failed { code: Option<i32>, message: String },
    /// ffmpeg exceeded the export timeout and was killed.
    TimedOut { timeout: Duration },
    /// The stream tag has no export profile; nothing was launched.
    Rejected { reason: String },
}

/// Outcome for one stream of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamExport {
    pub tag: String,
    pub index: usize,
    pub outcome: ExportOutcome,
}

impl StreamExport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ExportOutcome::Exported { .. })
    }
}

/// Every stream's export outcome, in container order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportReport {
    pub streams: Vec<StreamExport>,
}

impl ExportReport {
    /// True only if every stream was exported.
    pub fn is_success(&self) -> bool {
        self.streams.iter().all(StreamExport::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StreamExport> + '_ {
        self.streams.iter().filter(|s| !s.succeeded())
    }

    /// Per-stream ffmpeg exit codes. `None` where no exit code exists
    /// (rejected, timed out, killed by a signal, failed to start).
    pub fn exit_codes(&self) -> Vec<(&str, Option<i32>)> {
        self.streams
            .iter()
            .map(|s| {
                let code = match &s.outcome {
                    ExportOutcome::Exported { .. } => Some(0),
                    ExportOutcome::Failed { code, .. } => *code,
                    _ => None,
                };
                (s.tag.as_str(), code)
            })
            .collect()
    }
}

enum MemberState {
    Running {
        tool: RunningTool,
        partial: PathBuf,
        output: PathBuf,
    },
    Done(ExportOutcome),
}

struct Member {
    tag: String,
    index: usize,
    state: MemberState,
}

/// A fixed set of export processes, started together and awaited together.
pub struct ExportGroup {
    members: Vec<Member>,
    timeout: Duration,
}

impl ExportGroup {
    /// Start one export per stream in `streams`.
    ///
    /// Streams whose tag has no profile are rejected without launching
    /// anything, so no ambiguous output file is ever written for them.
    pub fn launch(
        tools: &ToolRegistry,
        artifacts: &Artifacts,
        streams: &StreamMap,
        options: &ExportOptions,
    ) -> Result<Self> {
        let base = tools.ffmpeg_export()?;

        let mut members = Vec::with_capacity(streams.len());
        for entry in streams.entries() {
            let state = match entry.kind() {
                Ok(kind) => Self::start(&base, artifacts, kind, entry.index, options),
                Err(e) => {
                    tracing::error!(
                        "Refusing to export stream {} ({}) of {:?}: {}",
                        entry.index,
                        entry.tag,
                        artifacts.input(),
                        e
                    );
                    MemberState::Done(ExportOutcome::Rejected {
                        reason: e.to_string(),
                    })
                }
            };
            members.push(Member {
                tag: entry.tag.clone(),
                index: entry.index,
                state,
            });
        }

        Ok(Self {
            members,
            timeout: tools.export_timeout(),
        })
    }

    fn start(
        base: &ToolCommand,
        artifacts: &Artifacts,
        kind: StreamKind,
        index: usize,
        options: &ExportOptions,
    ) -> MemberState {
        let profile = kind.profile();
        let partial = artifacts.partial_stream_path(kind);
        let output = artifacts.stream_path(kind);

        if let Err(e) = remove_if_exists(&partial) {
            return MemberState::Done(ExportOutcome::Failed {
                code: None,
                message: format!("cannot clear stale {:?}: {}", partial, e),
            });
        }

        let mut cmd = base.clone();
        cmd.args(["-y", "-nostdin", "-loglevel", "error", "-vsync", "0", "-i"])
            .arg(artifacts.input())
            .arg("-threads")
            .arg(options.threads.to_string())
            .arg("-map")
            .arg(format!("0:{}", index))
            .args([
                "-pix_fmt",
                profile.pixel_format,
                "-vcodec",
                profile.codec,
                "-crf",
                profile.quality,
            ])
            .arg(&partial);

        tracing::info!("Starting {} extraction (stream {})", kind, index);
        match cmd.spawn() {
            Ok(tool) => MemberState::Running {
                tool,
                partial,
                output,
            },
            Err(e) => MemberState::Done(ExportOutcome::Failed {
                code: None,
                message: e.to_string(),
            }),
        }
    }

    /// Number of streams in the group, launched or not.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Wait for every launched process and collect all outcomes.
    pub async fn wait_all(self) -> ExportReport {
        let timeout = self.timeout;
        let streams = join_all(self.members.into_iter().map(|member| async move {
            let outcome = match member.state {
                MemberState::Done(outcome) => outcome,
                MemberState::Running {
                    tool,
                    partial,
                    output,
                } => finish(tool, &partial, &output, timeout).await,
            };

            match &outcome {
                ExportOutcome::Exported { path } => {
                    tracing::info!("Finished {} extraction: {:?}", member.tag, path)
                }
                other => tracing::error!("{} extraction failed: {:?}", member.tag, other),
            }

            StreamExport {
                tag: member.tag,
                index: member.index,
                outcome,
            }
        }))
        .await;

        ExportReport { streams }
    }
}

async fn finish(tool: RunningTool, partial: &Path, output: &Path, timeout: Duration) -> ExportOutcome {
    let result = tool.wait().await;

    let outcome = match result {
        Ok(out) if out.status.success() => match tokio::fs::rename(partial, output).await {
            Ok(()) => {
                return ExportOutcome::Exported {
                    path: output.to_path_buf(),
                }
            }
            Err(e) => ExportOutcome::Failed {
                code: out.status.code(),
                message: format!("cannot move {:?} into place: {}", partial, e),
            },
        },
        Ok(out) => ExportOutcome::Failed {
            code: out.status.code(),
            message: format!("exited with status {}: {}", out.status, out.stderr.trim()),
        },
        Err(Error::TimedOut { .. }) => ExportOutcome::TimedOut { timeout },
        Err(e) => ExportOutcome::Failed {
            code: None,
            message: e.to_string(),
        },
    };

    if let Err(e) = remove_if_exists(partial) {
        tracing::warn!("Could not remove partial export {:?}: {}", partial, e);
    }
    outcome
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Export every stream of the container concurrently and wait for all of
/// them.
pub async fn export_streams(
    tools: &ToolRegistry,
    artifacts: &Artifacts,
    streams: &StreamMap,
    options: &ExportOptions,
) -> Result<ExportReport> {
    let group = ExportGroup::launch(tools, artifacts, streams, options)?;
    tracing::debug!("Launched {} stream exports", group.len());
    Ok(group.wait_all().await)
}
