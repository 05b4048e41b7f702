//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of `ffmpeg` and
//! `ffprobe` and hands out [`ToolCommand`] builders preloaded with the
//! configured timeout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;
use crate::{Error, Result};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &[FFMPEG, FFPROBE];

/// Default timeout for probes and frame reads: 5 minutes.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default timeout for a single stream export: 2 hours.
const DEFAULT_EXPORT_TIMEOUT_SECS: u64 = 7200;

/// Tool locations and time budgets, as read from the `[tools]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Budget for probes, frame reads and attachment dumps.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Budget for each per-stream export.
    #[serde(default = "default_export_timeout_secs")]
    pub export_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_export_timeout_secs() -> u64 {
    DEFAULT_EXPORT_TIMEOUT_SECS
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            export_timeout_secs: DEFAULT_EXPORT_TIMEOUT_SECS,
        }
    }
}

/// Configuration for a single external tool.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
    /// Maximum execution time before the tool is killed.
    pub timeout: Duration,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, ToolConfig>,
    export_timeout: Duration,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// A configured path is used when it exists; otherwise [`which::which`]
    /// locates the tool. Tools that are not found are omitted and only
    /// reported once something requires them.
    pub fn discover(config: &ToolsConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                FFMPEG => config.ffmpeg_path.as_deref(),
                FFPROBE => config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!("Configured {} path {:?} does not exist, searching PATH", name, p);
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(
                    name,
                    ToolConfig {
                        name: name.to_string(),
                        path,
                        timeout,
                    },
                );
            }
        }

        Self {
            tools,
            export_timeout: Duration::from_secs(config.export_timeout_secs),
        }
    }

    /// Build a registry from explicit executable paths, skipping discovery.
    pub fn from_paths(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        let mut tools = HashMap::new();
        for (name, path) in [(FFMPEG, ffmpeg.into()), (FFPROBE, ffprobe.into())] {
            tools.insert(
                name,
                ToolConfig {
                    name: name.to_string(),
                    path,
                    timeout,
                },
            );
        }

        Self {
            tools,
            export_timeout: Duration::from_secs(DEFAULT_EXPORT_TIMEOUT_SECS),
        }
    }

    /// Override the probe/read timeout for every tool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for tool in self.tools.values_mut() {
            tool.timeout = timeout;
        }
        self
    }

    /// Override the per-stream export timeout.
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn export_timeout(&self) -> Duration {
        self.export_timeout
    }

    /// Return the [`ToolConfig`] for the given tool, or
    /// [`Error::ToolNotFound`] if it was not found during discovery.
    pub fn require(&self, name: &str) -> Result<&ToolConfig> {
        self.tools
            .get(name)
            .ok_or_else(|| Error::tool_not_found(name))
    }

    /// A command builder for `ffprobe` with the probe timeout applied.
    pub fn ffprobe(&self) -> Result<ToolCommand> {
        self.command(FFPROBE)
    }

    /// A command builder for `ffmpeg` with the probe timeout applied.
    pub fn ffmpeg(&self) -> Result<ToolCommand> {
        self.command(FFMPEG)
    }

    /// A command builder for an `ffmpeg` export, with the export timeout.
    pub fn ffmpeg_export(&self) -> Result<ToolCommand> {
        let mut cmd = self.command(FFMPEG)?;
        cmd.timeout(self.export_timeout);
        Ok(cmd)
    }

    fn command(&self, name: &str) -> Result<ToolCommand> {
        let tool = self.require(name)?;
        let mut cmd = ToolCommand::new(tool.path.clone());
        cmd.timeout(tool.timeout);
        Ok(cmd)
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
