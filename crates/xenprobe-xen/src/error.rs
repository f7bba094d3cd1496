//! Error types for xenprobe-xen.

use thiserror::Error;
use xenprobe_common::ToolError;

/// Result type alias for xenprobe-xen operations.
pub type Result<T> = std::result::Result<T, XenError>;

/// Errors that can occur while driving the hypervisor.
#[derive(Debug, Error)]
pub enum XenError {
    /// The xl command failed
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The domain listing could not be parsed
    #[error("could not parse xl list output: line {line}: {reason}: '{text}'")]
    Parse {
        /// 1-based line number in the listing
        line: usize,
        /// Offending line
        text: String,
        /// What was wrong with it
        reason: String,
    },

    /// Domain missing or vanished unexpectedly
    #[error("domain lifecycle error: {0}")]
    Lifecycle(String),

    /// Boot specification is unusable
    #[error("invalid boot spec: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
