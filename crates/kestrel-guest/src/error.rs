//! Error types for guest-side actions
//!
//! Every variant maps onto one [`ErrorKind`] so the orchestrator can report
//! a stable category alongside the message.

use kestrel_common::ErrorKind;
use kestrel_hypervisor::HypervisorError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    /// Action not found in registry
    #[error("action not found: {0}")]
    NotFound(String),

    /// A guest-side object the action needs does not exist
    #[error("{0}")]
    ResourceNotFound(String),

    /// A platform limit leaves no room for the requested change
    #[error("{0}")]
    ResourceExhausted(String),

    /// Action timed out
    #[error("action timed out after {0:?}")]
    Timeout(Duration),

    /// The guest agent stayed unavailable for every allowed attempt
    #[error("guest operations never became available on {vm}")]
    GuestUnavailable { vm: String },

    #[error("command timed out after {timeout:?}: {command}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("command exited with status {code}: {command}")]
    CommandFailed { command: String, code: i32 },

    /// The guest agent dropped the process from its listing before it
    /// reported an exit code
    #[error("guest process {pid} vanished from the process listing: {command}")]
    ProcessNotListed { command: String, pid: i64 },

    #[error("upload to {path} failed with HTTP status {status}")]
    UploadFailed { path: String, status: u16 },

    /// Invalid action parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Missing required environment variable
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] HypervisorError),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::ResourceNotFound(_) => ErrorKind::NotFound,
            ActionError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ActionError::Timeout(_)
            | ActionError::GuestUnavailable { .. }
            | ActionError::CommandTimeout { .. } => ErrorKind::Timeout,
            ActionError::CommandFailed { .. } => ErrorKind::CommandFailed,
            ActionError::InvalidParameters(_) | ActionError::MissingEnvVar(_) => {
                ErrorKind::InvalidConfig
            }
            ActionError::Hypervisor(HypervisorError::NotFound { .. }) => ErrorKind::NotFound,
            ActionError::NotFound(_)
            | ActionError::ProcessNotListed { .. }
            | ActionError::UploadFailed { .. }
            | ActionError::Hypervisor(_) => ErrorKind::Internal,
        }
    }
}

impl From<kestrel_common::Error> for ActionError {
    fn from(err: kestrel_common::Error) -> Self {
        ActionError::InvalidParameters(err.to_string())
    }
}

/// Result type for action operations
pub type Result<T> = std::result::Result<T, ActionError>;
