//! In-memory hypervisor for tests and demo mode
//!
//! Keeps VMs, networks and guest files in a map and completes every task
//! immediately. Guest-agent behaviour can be scripted: a number of
//! `GuestOperationsUnavailable` faults before transfers or process starts
//! succeed, exit codes for commands matching a pattern, commands that never
//! finish and commands the process listing "forgets".

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::transfer::UploadClient;
use crate::types::{
    Credentials, DeployRequest, DeviceChange, DiskBacking, DiskMode, GuestProgram, NetworkRef,
    VirtualDevice, VmRef,
};
use async_trait::async_trait;
use kestrel_common::{InstanceInfo, InstanceMeta, PowerState};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

const SCSI_CONTROLLER_KEY: i32 = 1000;
const PCI_CONTROLLER_KEY: i32 = 100;

/// A guest process started through [`MemoryHypervisor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCommand {
    pub vm: String,
    pub path: String,
    pub arguments: String,
    pub pid: i64,
}

#[derive(Debug)]
struct MemoryVm {
    vm: VmRef,
    power: PowerState,
    cpu: u32,
    ram_gb: u32,
    meta: Option<InstanceMeta>,
    networks: Vec<String>,
    ips: Vec<String>,
    devices: Vec<VirtualDevice>,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
struct Process {
    exit_code: Option<i32>,
    listed: bool,
}

#[derive(Debug, Default)]
struct State {
    networks: BTreeMap<String, NetworkRef>,
    vms: BTreeMap<String, MemoryVm>,
    next_vm: u64,
    next_pid: i64,
    transfer_faults: u32,
    start_faults: u32,
    transfer_attempts: u32,
    upload_status: Option<u16>,
    pending_uploads: HashMap<String, (String, String)>,
    exit_codes: Vec<(String, i32)>,
    hung: Vec<String>,
    unlisted: Vec<String>,
    processes: HashMap<i64, Process>,
    commands: Vec<GuestCommand>,
}

impl State {
    fn vm_mut(&mut self, vm: &VmRef) -> Result<&mut MemoryVm> {
        self.vms.get_mut(&vm.id).ok_or_else(|| HypervisorError::NotFound {
            kind: "vm",
            name: vm.name.clone(),
        })
    }

    fn running_vm(&mut self, vm: &VmRef) -> Result<&mut MemoryVm> {
        let entry = self.vm_mut(vm)?;
        if entry.power != PowerState::On {
            return Err(HypervisorError::GuestOperationsUnavailable);
        }
        Ok(entry)
    }

    fn insert_vm(&mut self, owner: &str, name: &str, networks: Vec<String>) -> Result<VmRef> {
        if self
            .vms
            .values()
            .any(|entry| entry.vm.owner == owner && entry.vm.name == name)
        {
            return Err(HypervisorError::AlreadyExists {
                kind: "vm",
                name: name.to_string(),
            });
        }

        self.next_vm += 1;
        let vm = VmRef {
            id: format!("vm-{}", self.next_vm),
            name: name.to_string(),
            owner: owner.to_string(),
        };
        self.vms.insert(
            vm.id.clone(),
            MemoryVm {
                vm: vm.clone(),
                power: PowerState::Off,
                cpu: 1,
                ram_gb: 1,
                meta: None,
                networks,
                ips: Vec::new(),
                devices: default_devices(),
                files: BTreeMap::new(),
            },
        );
        Ok(vm)
    }
}

/// Controller, boot disk at unit 0 and a NIC, as a freshly imported image has
fn default_devices() -> Vec<VirtualDevice> {
    vec![
        VirtualDevice {
            key: SCSI_CONTROLLER_KEY,
            label: "SCSI controller 0".to_string(),
            controller_key: Some(PCI_CONTROLLER_KEY),
            unit_number: None,
            capacity_kb: None,
            backing: None,
        },
        VirtualDevice {
            key: 2000,
            label: "Hard disk 1".to_string(),
            controller_key: Some(SCSI_CONTROLLER_KEY),
            unit_number: Some(0),
            capacity_kb: Some(40 * 1024 * 1024),
            backing: Some(DiskBacking {
                file_name: "[datastore1] boot.vmdk".to_string(),
                thin_provisioned: true,
                disk_mode: DiskMode::Persistent,
            }),
        },
        VirtualDevice {
            key: 4000,
            label: "Network adapter 1".to_string(),
            controller_key: Some(PCI_CONTROLLER_KEY),
            unit_number: Some(7),
            capacity_kb: None,
            backing: None,
        },
    ]
}

/// Hypervisor backed by process memory
#[derive(Debug, Default)]
pub struct MemoryHypervisor {
    state: Mutex<State>,
}

impl MemoryHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network to the network map
    pub fn with_network(self, name: &str) -> Self {
        self.add_network(name);
        self
    }

    pub fn add_network(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let id = format!("network-{}", state.networks.len() + 1);
        state.networks.insert(
            name.to_string(),
            NetworkRef {
                id,
                name: name.to_string(),
            },
        );
    }

    /// Seed a powered-on VM, optionally tagged
    pub fn add_vm(&self, owner: &str, name: &str, meta: Option<InstanceMeta>) -> Result<VmRef> {
        let mut state = self.state.lock().unwrap();
        let vm = state.insert_vm(owner, name, Vec::new())?;
        let entry = state.vm_mut(&vm)?;
        entry.power = PowerState::On;
        entry.meta = meta;
        Ok(vm)
    }

    /// Look up a VM by namespace and name
    pub fn find(&self, owner: &str, name: &str) -> Option<VmRef> {
        let state = self.state.lock().unwrap();
        state
            .vms
            .values()
            .find(|entry| entry.vm.owner == owner && entry.vm.name == name)
            .map(|entry| entry.vm.clone())
    }

    /// The next `count` transfer requests fail with `GuestOperationsUnavailable`
    pub fn fail_file_transfers(&self, count: u32) {
        self.state.lock().unwrap().transfer_faults = count;
    }

    /// The next `count` process starts fail with `GuestOperationsUnavailable`
    pub fn fail_process_starts(&self, count: u32) {
        self.state.lock().unwrap().start_faults = count;
    }

    /// Answer every upload PUT with `status` without storing the payload
    pub fn set_upload_status(&self, status: u16) {
        self.state.lock().unwrap().upload_status = Some(status);
    }

    /// Commands whose arguments contain `pattern` exit with `code`
    pub fn set_exit_code(&self, pattern: &str, code: i32) {
        self.state
            .lock()
            .unwrap()
            .exit_codes
            .push((pattern.to_string(), code));
    }

    /// Commands whose arguments contain `pattern` never exit
    pub fn hang_process(&self, pattern: &str) {
        self.state.lock().unwrap().hung.push(pattern.to_string());
    }

    /// Commands whose arguments contain `pattern` vanish from the process listing
    pub fn unlist_process(&self, pattern: &str) {
        self.state.lock().unwrap().unlisted.push(pattern.to_string());
    }

    pub fn set_devices(&self, vm: &VmRef, devices: Vec<VirtualDevice>) -> Result<()> {
        self.state.lock().unwrap().vm_mut(vm)?.devices = devices;
        Ok(())
    }

    pub fn set_guest_ips(&self, vm: &VmRef, ips: Vec<String>) -> Result<()> {
        self.state.lock().unwrap().vm_mut(vm)?.ips = ips;
        Ok(())
    }

    /// Number of `initiate_file_transfer` calls, failed ones included
    pub fn file_transfer_attempts(&self) -> u32 {
        self.state.lock().unwrap().transfer_attempts
    }

    /// Every guest process started so far, in order
    pub fn commands(&self) -> Vec<GuestCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Contents of a file uploaded into the guest
    pub fn guest_file(&self, vm: &VmRef, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.vms.get(&vm.id)?.files.get(path).cloned()
    }

    /// CPU count and RAM in GB
    pub fn sizing(&self, vm: &VmRef) -> Option<(u32, u32)> {
        let state = self.state.lock().unwrap();
        state.vms.get(&vm.id).map(|entry| (entry.cpu, entry.ram_gb))
    }
}

#[async_trait]
impl Hypervisor for MemoryHypervisor {
    async fn list_vms(&self, owner: &str) -> Result<Vec<VmRef>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .vms
            .values()
            .filter(|entry| entry.vm.owner == owner)
            .map(|entry| entry.vm.clone())
            .collect())
    }

    async fn network(&self, name: &str) -> Result<Option<NetworkRef>> {
        Ok(self.state.lock().unwrap().networks.get(name).cloned())
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<VmRef> {
        let mut state = self.state.lock().unwrap();
        if !state.networks.contains_key(&request.network.name) {
            return Err(HypervisorError::NotFound {
                kind: "network",
                name: request.network.name.clone(),
            });
        }
        let vm = state.insert_vm(
            &request.owner,
            &request.name,
            vec![request.network.name.clone()],
        )?;
        debug!(vm = %vm.name, id = %vm.id, image = %request.image.display(), "Deployed VM");
        Ok(vm)
    }

    async fn power(&self, vm: &VmRef, power: PowerState) -> Result<()> {
        self.state.lock().unwrap().vm_mut(vm)?.power = power;
        Ok(())
    }

    async fn set_cpu(&self, vm: &VmRef, count: u32) -> Result<()> {
        self.state.lock().unwrap().vm_mut(vm)?.cpu = count;
        Ok(())
    }

    async fn set_ram(&self, vm: &VmRef, gb: u32) -> Result<()> {
        self.state.lock().unwrap().vm_mut(vm)?.ram_gb = gb;
        Ok(())
    }

    async fn get_meta(&self, vm: &VmRef) -> Result<Option<InstanceMeta>> {
        Ok(self.state.lock().unwrap().vm_mut(vm)?.meta.clone())
    }

    async fn set_meta(&self, vm: &VmRef, meta: &InstanceMeta) -> Result<()> {
        self.state.lock().unwrap().vm_mut(vm)?.meta = Some(meta.clone());
        Ok(())
    }

    async fn get_info(&self, vm: &VmRef, _ensure_ip: bool) -> Result<InstanceInfo> {
        let mut state = self.state.lock().unwrap();
        let entry = state.vm_mut(vm)?;
        Ok(InstanceInfo {
            state: entry.power,
            console: format!("https://memory.invalid/ui/vm/{}", entry.vm.id),
            ips: entry.ips.clone(),
            networks: entry.networks.clone(),
            meta: entry.meta.clone(),
        })
    }

    async fn initiate_file_transfer(
        &self,
        vm: &VmRef,
        _creds: &Credentials,
        guest_path: &str,
        _size: u64,
        _overwrite: bool,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.transfer_attempts += 1;
        if state.transfer_faults > 0 {
            state.transfer_faults -= 1;
            return Err(HypervisorError::GuestOperationsUnavailable);
        }
        let vm_id = state.running_vm(vm)?.vm.id.clone();
        let url = format!("memory://{}/upload/{}", vm_id, state.transfer_attempts);
        state
            .pending_uploads
            .insert(url.clone(), (vm_id, guest_path.to_string()));
        Ok(url)
    }

    async fn start_process(
        &self,
        vm: &VmRef,
        _creds: &Credentials,
        program: &GuestProgram,
    ) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        if state.start_faults > 0 {
            state.start_faults -= 1;
            return Err(HypervisorError::GuestOperationsUnavailable);
        }
        state.running_vm(vm)?;

        let matches = |patterns: &[String]| {
            patterns
                .iter()
                .any(|pattern| program.arguments.contains(pattern.as_str()))
        };
        let exit_code = if matches(&state.hung) {
            None
        } else {
            Some(
                state
                    .exit_codes
                    .iter()
                    .find(|(pattern, _)| program.arguments.contains(pattern.as_str()))
                    .map(|(_, code)| *code)
                    .unwrap_or(0),
            )
        };
        let listed = !matches(&state.unlisted);

        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.insert(pid, Process { exit_code, listed });
        state.commands.push(GuestCommand {
            vm: vm.name.clone(),
            path: program.path.clone(),
            arguments: program.arguments.clone(),
            pid,
        });
        Ok(pid)
    }

    async fn process_exit_code(
        &self,
        vm: &VmRef,
        _creds: &Credentials,
        pid: i64,
    ) -> Result<Option<i32>> {
        let mut state = self.state.lock().unwrap();
        state.running_vm(vm)?;
        match state.processes.get(&pid) {
            Some(process) if process.listed => Ok(process.exit_code),
            _ => Err(HypervisorError::ProcessNotListed { pid }),
        }
    }

    async fn devices(&self, vm: &VmRef) -> Result<Vec<VirtualDevice>> {
        Ok(self.state.lock().unwrap().vm_mut(vm)?.devices.clone())
    }

    async fn reconfigure(&self, vm: &VmRef, changes: &[DeviceChange]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.vm_mut(vm)?;
        for change in changes {
            match change {
                DeviceChange::AddDisk(spec) => {
                    if !entry.devices.iter().any(|d| d.key == spec.controller_key) {
                        return Err(HypervisorError::TaskFailed(format!(
                            "controller {} does not exist",
                            spec.controller_key
                        )));
                    }
                    if entry.devices.iter().any(|d| {
                        d.controller_key == Some(spec.controller_key)
                            && d.unit_number == Some(spec.unit_number)
                    }) {
                        return Err(HypervisorError::TaskFailed(format!(
                            "unit {} on controller {} is already in use",
                            spec.unit_number, spec.controller_key
                        )));
                    }
                    let key = entry.devices.iter().map(|d| d.key).max().unwrap_or(0) + 1;
                    let disks = entry.devices.iter().filter(|d| d.is_disk()).count();
                    entry.devices.push(VirtualDevice {
                        key,
                        label: format!("Hard disk {}", disks + 1),
                        controller_key: Some(spec.controller_key),
                        unit_number: Some(spec.unit_number),
                        capacity_kb: Some(spec.capacity_kb),
                        backing: Some(spec.backing.clone()),
                    });
                }
            }
        }
        Ok(())
    }

    async fn destroy(&self, vm: &VmRef) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.vm_mut(vm)?.power == PowerState::On {
            return Err(HypervisorError::TaskFailed(format!(
                "cannot destroy {} while it is powered on",
                vm.name
            )));
        }
        state.vms.remove(&vm.id);
        Ok(())
    }
}

#[async_trait]
impl UploadClient for MemoryHypervisor {
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<u16> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.upload_status {
            return Ok(status);
        }
        let Some((vm_id, path)) = state.pending_uploads.remove(url) else {
            return Ok(404);
        };
        match state.vms.get_mut(&vm_id) {
            Some(entry) => {
                entry.files.insert(path, body);
                Ok(200)
            }
            None => Ok(404),
        }
    }
}
