// ABOUTME: Error types for sandbox operations
// ABOUTME: Maps every failure onto the wire error envelope (kind + retryable + details)

use serde::Serialize;
use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Malformed or missing request data (unknown template, bad path, ...)
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Sandbox id is not in the registry
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// Container create/start failed; any partial container has been removed
    #[error("container create failed: {0}")]
    ContainerCreateFailed(String),

    /// The exec deadline fired before the exec could be created or attached
    #[error("exec timed out after {timeout_ms}ms")]
    ExecTimeout { timeout_ms: u64 },

    /// Exec create/attach/start failed
    #[error("exec failed: {0}")]
    ExecFailed(String),

    /// Container removal failed
    #[error("delete failed: {0}")]
    DeleteFailed(String),

    /// A file operation exited nonzero inside the container
    #[error("file operation failed: {message}")]
    IoFailed { message: String, stderr: String },

    /// Docker/daemon-level errors
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Wire-level error classification, serialized into the RPC error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidParams,
    NotFound,
    ContainerCreateFailed,
    ExecTimeout,
    ExecFailed,
    DeleteFailed,
    IoFailed,
    MethodNotFound,
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::InvalidParams(_) => ErrorKind::InvalidParams,
            SandboxError::NotFound(_) => ErrorKind::NotFound,
            SandboxError::ContainerCreateFailed(_) => ErrorKind::ContainerCreateFailed,
            SandboxError::ExecTimeout { .. } => ErrorKind::ExecTimeout,
            SandboxError::ExecFailed(_) => ErrorKind::ExecFailed,
            SandboxError::DeleteFailed(_) => ErrorKind::DeleteFailed,
            SandboxError::IoFailed { .. } => ErrorKind::IoFailed,
            SandboxError::Docker(_) => ErrorKind::ExecFailed,
        }
    }

    /// Whether the client may usefully retry the same request.
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            SandboxError::InvalidParams(_) | SandboxError::NotFound(_)
        )
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
