//! Error types for xenprobe-net.

use thiserror::Error;
use xenprobe_common::ToolError;

/// Result type alias for xenprobe-net operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors raised by network tooling and parsers.
#[derive(Debug, Error)]
pub enum NetError {
    /// A network tool failed
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Tool output did not follow its grammar
    #[error("line {line}: {reason}: '{text}'")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Offending line
        text: String,
        /// What was wrong with it
        reason: String,
    },

    /// Malformed network address or netmask
    #[error("invalid network: {0}")]
    Network(#[from] ipnetwork::IpNetworkError),

    /// Invalid network address or configuration
    #[error("invalid network configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    pub(crate) fn parse(line: usize, text: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            line,
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}
