//! Error types for xenprobe-core.

use std::time::Duration;
use thiserror::Error;
use xenprobe_common::ToolError;

/// Result type alias for xenprobe-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can end a test stage.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A prerequisite is missing or misconfigured
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the hypervisor layer
    #[error(transparent)]
    Xen(#[from] xenprobe_xen::XenError),

    /// Error from host network tooling
    #[error(transparent)]
    Net(#[from] xenprobe_net::NetError),

    /// An external tool failed
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The unikernel did not finish in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Domain missing, vanished or in an unexpected state
    #[error("{0}")]
    Lifecycle(String),

    /// An output check failed or a stage panicked
    #[error("{0}")]
    Assertion(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
