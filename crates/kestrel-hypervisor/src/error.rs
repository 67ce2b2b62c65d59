//! Faults raised by hypervisor primitives

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HypervisorError {
    /// The guest agent inside the VM is not running yet
    ///
    /// Expected right after power-on; callers retry on this fault only.
    #[error("guest operations are not available")]
    GuestOperationsUnavailable,

    /// The guest agent accepted a process but then omitted it from its
    /// process listing
    #[error("guest process {pid} missing from the guest process listing")]
    ProcessNotListed { pid: i64 },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// An object with the same name already exists in the namespace
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// A long-running hypervisor task finished in error
    #[error("hypervisor task failed: {0}")]
    TaskFailed(String),

    /// Transport or protocol failure talking to the control plane
    #[error("hypervisor fault: {0}")]
    Fault(String),
}

pub type Result<T> = std::result::Result<T, HypervisorError>;
