//! Value types exchanged with the hypervisor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Handle to one VM inside an owner's namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmRef {
    /// Hypervisor-assigned identifier
    pub id: String,
    pub name: String,
    /// Namespace (folder) the VM lives in
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    pub id: String,
    pub name: String,
}

/// Guest OS login used by the guest agent
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Deploy a packaged image into the owner's namespace
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub owner: String,
    pub name: String,
    pub image: PathBuf,
    /// Network every NIC in the image is mapped onto
    pub network: NetworkRef,
}

/// A process to start through the guest agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestProgram {
    pub path: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskMode {
    Persistent,
    IndependentPersistent,
    NonPersistent,
}

/// Backing file of a virtual disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskBacking {
    /// Empty when the hypervisor should pick a datastore path
    pub file_name: String,
    pub thin_provisioned: bool,
    pub disk_mode: DiskMode,
}

/// One entry of a VM's device list
///
/// Only disks carry a `backing`; controllers and NICs are listed too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDevice {
    pub key: i32,
    pub label: String,
    pub controller_key: Option<i32>,
    pub unit_number: Option<u8>,
    pub capacity_kb: Option<u64>,
    pub backing: Option<DiskBacking>,
}

impl VirtualDevice {
    pub fn is_disk(&self) -> bool {
        self.backing.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    /// Create the backing file along with the device
    Create,
}

/// Descriptor for a disk to add
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDiskSpec {
    pub controller_key: i32,
    pub unit_number: u8,
    pub capacity_kb: u64,
    pub backing: DiskBacking,
    pub file_operation: FileOperation,
}

/// One change in a device reconfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceChange {
    AddDisk(VirtualDiskSpec),
}
