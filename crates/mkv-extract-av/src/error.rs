//! Error types for mkv-extract-av.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while probing, reading or exporting recordings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// An external tool failed to execute or reported an error.
    #[error("tool execution failed: {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    /// An external tool exceeded its time budget and was killed.
    #[error("{tool} timed out after {timeout:?}")]
    TimedOut { tool: String, timeout: Duration },

    /// Failed to parse tool output.
    #[error("failed to parse {tool} output: {message}")]
    ParseError { tool: String, message: String },

    /// The specified file was not found.
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// A stream tag with no export profile.
    #[error("unknown stream '{0}': no export profile")]
    UnknownStream(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a tool execution failed error.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse_error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }
}
