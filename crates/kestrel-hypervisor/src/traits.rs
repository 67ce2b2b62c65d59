//! The primitive operations provisioning needs from a hypervisor

use crate::error::Result;
use crate::types::{
    Credentials, DeployRequest, DeviceChange, GuestProgram, NetworkRef, VirtualDevice, VmRef,
};
use async_trait::async_trait;
use kestrel_common::{InstanceInfo, InstanceMeta, PowerState};

/// Hypervisor control plane
///
/// Every method that starts a hypervisor task (deploy, reconfigure,
/// destroy, power) returns only once the task has finished. Implementations
/// serialize conflicting operations on the same VM; callers do not lock.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// VMs in the owner's namespace
    async fn list_vms(&self, owner: &str) -> Result<Vec<VmRef>>;

    /// Look up a network by its full name
    async fn network(&self, name: &str) -> Result<Option<NetworkRef>>;

    /// Deploy a packaged image; the new VM is left powered off
    async fn deploy(&self, request: &DeployRequest) -> Result<VmRef>;

    async fn power(&self, vm: &VmRef, state: PowerState) -> Result<()>;

    async fn set_cpu(&self, vm: &VmRef, count: u32) -> Result<()>;

    async fn set_ram(&self, vm: &VmRef, gb: u32) -> Result<()>;

    async fn get_meta(&self, vm: &VmRef) -> Result<Option<InstanceMeta>>;

    async fn set_meta(&self, vm: &VmRef, meta: &InstanceMeta) -> Result<()>;

    /// Power state, console, addresses, networks and metadata
    ///
    /// With `ensure_ip` set, implementations wait until the guest reports
    /// an address.
    async fn get_info(&self, vm: &VmRef, ensure_ip: bool) -> Result<InstanceInfo>;

    /// Ask the guest agent for a one-time upload URL
    ///
    /// Fails with `GuestOperationsUnavailable` while the agent is booting.
    async fn initiate_file_transfer(
        &self,
        vm: &VmRef,
        creds: &Credentials,
        guest_path: &str,
        size: u64,
        overwrite: bool,
    ) -> Result<String>;

    /// Start a process inside the guest and return its pid
    async fn start_process(
        &self,
        vm: &VmRef,
        creds: &Credentials,
        program: &GuestProgram,
    ) -> Result<i64>;

    /// Exit code of a started process, `None` while it is still running
    ///
    /// Fails with `ProcessNotListed` when the guest agent omits the pid.
    async fn process_exit_code(&self, vm: &VmRef, creds: &Credentials, pid: i64)
        -> Result<Option<i32>>;

    async fn devices(&self, vm: &VmRef) -> Result<Vec<VirtualDevice>>;

    async fn reconfigure(&self, vm: &VmRef, changes: &[DeviceChange]) -> Result<()>;

    async fn destroy(&self, vm: &VmRef) -> Result<()>;
}
