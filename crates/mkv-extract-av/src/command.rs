//! Builder for executing external tool commands with timeout support.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::{Error, Result};

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output, raw. Frame reads put pixel data here.
    pub stdout: Vec<u8>,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl ToolOutput {
    /// Standard output decoded as lossy UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use mkv_extract_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> mkv_extract_av::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/recording.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout_lossy());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
    allow_failure: bool,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            allow_failure: false,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(s.as_ref().to_os_string());
        self
    }

    /// Append multiple arguments.
    pub fn args<I, S>(&mut self, iter: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(iter.into_iter().map(|s| s.as_ref().to_os_string()));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Return the output even when the process exits with a non-zero status.
    pub fn allow_failure(&mut self) -> &mut Self {
        self.allow_failure = true;
        self
    }

    /// The short name of the program, used in errors and logs.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The command line as a single string, for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Start the process without waiting for it.
    ///
    /// The child is killed if the returned [`RunningTool`] is dropped or its
    /// timeout expires while waiting.
    pub fn spawn(&self) -> Result<RunningTool> {
        let program_name = self.program_name();
        tracing::debug!("Running: {}", self.command_line());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found(program_name.clone())
            } else {
                Error::tool_failed(program_name.clone(), format!("failed to spawn: {e}"))
            }
        })?;

        Ok(RunningTool {
            program_name,
            child,
            timeout: self.timeout,
        })
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::TimedOut`] if the process outlives the timeout (it is killed).
    /// - [`Error::ToolFailed`] if the process exits with a non-zero status,
    ///   unless [`allow_failure`](Self::allow_failure) was set.
    /// - [`Error::ToolNotFound`] if the program does not exist.
    pub async fn execute(&self) -> Result<ToolOutput> {
        let output = self.spawn()?.wait().await?;

        if !self.allow_failure && !output.status.success() {
            return Err(Error::tool_failed(
                self.program_name(),
                format!(
                    "exited with status {}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            ));
        }

        Ok(output)
    }
}

/// A started external process.
#[derive(Debug)]
pub struct RunningTool {
    program_name: String,
    child: Child,
    timeout: Duration,
}

impl RunningTool {
    /// Wait for the process to exit and collect its output.
    ///
    /// A non-zero exit status is not an error here; callers inspect
    /// [`ToolOutput::status`].
    pub async fn wait(self) -> Result<ToolOutput> {
        let Self {
            program_name,
            child,
            timeout,
        } = self;

        // On expiry the wait future is dropped along with the child, and
        // kill_on_drop terminates the process.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ToolOutput {
                status: output.status,
                stdout: output.stdout,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(Error::tool_failed(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(Error::TimedOut {
                tool: program_name,
                timeout,
            }),
        }
    }
}
