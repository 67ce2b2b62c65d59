//! Error types for provisioning workflows

use kestrel_common::ErrorKind;
use kestrel_guest::ActionError;
use kestrel_hypervisor::HypervisorError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No image found for version {0}")]
    ImageNotFound(String),

    /// More than one artifact claims the same version
    #[error("Found {count} images for version {version}")]
    AmbiguousImage { version: String, count: usize },

    /// More than one installer script claims the same version
    #[error("Found {count} installers for version {version}")]
    AmbiguousInstaller { version: String, count: usize },

    #[error("No network named {0} found")]
    NetworkNotFound(String),

    /// No VM of that name carries the expected component tag
    #[error("No {component} named {name} found")]
    InstanceNotFound { component: String, name: String },

    #[error("{0}")]
    InvalidConfig(String),

    #[error("action '{action}' failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: ActionError,
    },

    #[error("hypervisor error: {0}")]
    Hypervisor(#[from] HypervisorError),

    #[error("failed to read image directory {path}: {source}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid task request: {0}")]
    InvalidTask(String),

    #[error("no handler registered for task {0}")]
    MissingHandler(String),

    #[error("more than one handler registered for task {0}")]
    DuplicateHandler(String),

    #[error("task queue is closed")]
    QueueClosed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::ImageNotFound(_)
            | ProvisionError::NetworkNotFound(_)
            | ProvisionError::InstanceNotFound { .. } => ErrorKind::NotFound,
            ProvisionError::InvalidConfig(_) | ProvisionError::InvalidTask(_) => {
                ErrorKind::InvalidConfig
            }
            ProvisionError::ActionFailed { source, .. } => source.kind(),
            ProvisionError::Hypervisor(HypervisorError::NotFound { .. }) => ErrorKind::NotFound,
            ProvisionError::AmbiguousImage { .. }
            | ProvisionError::AmbiguousInstaller { .. }
            | ProvisionError::Hypervisor(_)
            | ProvisionError::Catalog { .. }
            | ProvisionError::MissingHandler(_)
            | ProvisionError::DuplicateHandler(_)
            | ProvisionError::QueueClosed
            | ProvisionError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<kestrel_common::Error> for ProvisionError {
    fn from(err: kestrel_common::Error) -> Self {
        ProvisionError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::InstanceNotFound {
            component: "Appliance".to_string(),
            name: "box9".to_string(),
        };
        assert_eq!(err.to_string(), "No Appliance named box9 found");

        let err = ProvisionError::NetworkNotFound("alice_lan2".to_string());
        assert_eq!(err.to_string(), "No network named alice_lan2 found");
    }

    #[test]
    fn test_action_failure_keeps_its_kind() {
        let err = ProvisionError::ActionFailed {
            action: "disk-attach".to_string(),
            source: ActionError::ResourceExhausted("full".to_string()),
        };
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(err.to_string(), "action 'disk-attach' failed: full");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ProvisionError::ImageNotFound("9.9".to_string()).kind(), ErrorKind::NotFound);
        assert_eq!(
            ProvisionError::AmbiguousImage {
                version: "1.0".to_string(),
                count: 2
            }
            .kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            ProvisionError::from(kestrel_common::Error::InvalidConfig("x".to_string())).kind(),
            ErrorKind::InvalidConfig
        );
    }
}
