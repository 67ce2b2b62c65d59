use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification every crate-level error maps onto.
///
/// This is what callers branch on; the message carried next to it is for
/// humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Named instance, image version or network is absent, or the component
    /// tag did not match
    NotFound,
    /// Supplied parameters are inconsistent
    InvalidConfig,
    /// Disk slot ceiling reached
    ResourceExhausted,
    /// Guest agent never became ready, or a call exceeded its timeout
    Timeout,
    /// A guest command exited non-zero under the strict failure policy
    CommandFailed,
    /// Everything else: hypervisor faults, I/O, ambiguous catalog entries
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidConfig(String),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::ConfigRead { .. } | Error::ConfigParse { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::ResourceExhausted.as_str(), "resource_exhausted");
        assert_eq!(
            serde_json::to_string(&ErrorKind::CommandFailed).unwrap(),
            "\"command_failed\""
        );
    }

    #[test]
    fn test_error_kind_mapping() {
        let err = Error::InvalidConfig("bad netmask".to_string());
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert_eq!(err.to_string(), "bad netmask");
    }
}
