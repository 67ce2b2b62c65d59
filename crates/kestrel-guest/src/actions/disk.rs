//! Extra data disk
//!
//! Unit numbers on a virtual SCSI controller are dense: the new disk goes
//! right above the highest unit already backed by a disk. Unit 7 belongs to
//! the controller itself and a controller holds at most 16 units.

use crate::context::{ActionContext, ActionResult};
use crate::error::{ActionError, Result};
use crate::progress::Progress;
use crate::traits::Action;
use async_trait::async_trait;
use kestrel_common::DiskSpec;
use kestrel_hypervisor::{
    DeviceChange, DiskBacking, DiskMode, FileOperation, VirtualDevice, VirtualDiskSpec,
};
use tracing::info;

/// Unit number reserved for the SCSI controller
pub const RESERVED_UNIT: u8 = 7;

/// Units per controller
pub const MAX_UNITS: u8 = 16;

/// Where the next disk goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSlot {
    pub controller_key: i32,
    pub unit_number: u8,
}

/// Pick the slot after the highest disk-backed unit
pub fn next_disk_slot(devices: &[VirtualDevice]) -> Result<DiskSlot> {
    let last = devices
        .iter()
        .filter(|device| device.is_disk())
        .filter_map(|device| Some((device.unit_number?, device.controller_key?)))
        .max_by_key(|(unit, _)| *unit)
        .ok_or_else(|| ActionError::ResourceNotFound("No virtual disks found on VM".to_string()))?;

    let (highest, controller_key) = last;
    let mut unit_number = highest.saturating_add(1);
    if unit_number == RESERVED_UNIT {
        unit_number += 1;
    }
    if unit_number >= MAX_UNITS {
        return Err(ActionError::ResourceExhausted(format!(
            "No free unit on controller {}: unit {} exceeds the limit of {} devices",
            controller_key, unit_number, MAX_UNITS
        )));
    }

    Ok(DiskSlot {
        controller_key,
        unit_number,
    })
}

/// Thin-provisioned, persistent disk in the given slot
pub fn disk_spec(slot: DiskSlot, disk: DiskSpec) -> Result<VirtualDiskSpec> {
    let capacity_kb = disk.capacity_kb().ok_or_else(|| {
        ActionError::InvalidParameters(format!("Disk size too large: {} GB", disk.size_gb))
    })?;
    Ok(VirtualDiskSpec {
        controller_key: slot.controller_key,
        unit_number: slot.unit_number,
        capacity_kb,
        backing: DiskBacking {
            file_name: String::new(),
            thin_provisioned: true,
            disk_mode: DiskMode::Persistent,
        },
        file_operation: FileOperation::Create,
    })
}

/// Attach an additional disk to the VM
///
/// Environment variables:
/// - `DISK_SIZE_GB` (optional): defaults to `appliance.disk_size_gb`
pub struct DiskAttachAction;

impl DiskAttachAction {
    fn disk(ctx: &ActionContext) -> Result<DiskSpec> {
        let size_gb = match ctx.env("DISK_SIZE_GB") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ActionError::InvalidParameters(format!("Invalid disk size: {}", raw))
            })?,
            None => ctx.config().appliance.disk_size_gb,
        };
        if size_gb == 0 {
            return Err(ActionError::InvalidParameters(
                "Disk size must be at least 1 GB".to_string(),
            ));
        }
        let disk = DiskSpec { size_gb };
        if disk.capacity_kb().is_none() {
            return Err(ActionError::InvalidParameters(format!(
                "Disk size too large: {} GB",
                size_gb
            )));
        }
        Ok(disk)
    }
}

#[async_trait]
impl Action for DiskAttachAction {
    fn name(&self) -> &str {
        "disk-attach"
    }

    fn description(&self) -> &str {
        "Attach an additional thin-provisioned data disk"
    }

    fn optional_env_vars(&self) -> Vec<&str> {
        vec!["DISK_SIZE_GB"]
    }

    fn validate(&self, ctx: &ActionContext) -> Result<()> {
        Self::disk(ctx).map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let disk = Self::disk(ctx)?;
        let vm = ctx.vm();

        let devices = ctx.hypervisor().devices(vm).await?;
        let slot = next_disk_slot(&devices)?;
        let spec = disk_spec(slot, disk)?;

        ctx.progress_reporter().report(Progress::new(
            self.name(),
            50,
            format!("Adding {} GB disk at unit {}", disk.size_gb, slot.unit_number),
        ));
        ctx.hypervisor()
            .reconfigure(vm, &[DeviceChange::AddDisk(spec)])
            .await?;

        info!(
            vm = %vm.name,
            size_gb = disk.size_gb,
            controller = slot.controller_key,
            unit = slot.unit_number,
            "Attached disk"
        );

        Ok(
            ActionResult::success(format!("Attached {} GB disk", disk.size_gb))
                .with_output("unit_number", slot.unit_number)
                .with_output("controller_key", slot.controller_key),
        )
    }
}
