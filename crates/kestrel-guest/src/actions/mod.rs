//! Guest-side provisioning actions
//!
//! # Available Actions
//!
//! - `installer-upload` - Image installer script into the staging directory
//! - `network-config` - Static IPv4 configuration and hostname
//! - `disk-attach` - Additional thin-provisioned data disk
//! - `desktop-install` - GNOME desktop and xrdp remote access

mod desktop;
mod disk;
mod installer;
mod network;

pub use desktop::DesktopInstallAction;
pub use disk::{disk_spec, next_disk_slot, DiskAttachAction, DiskSlot, MAX_UNITS, RESERVED_UNIT};
pub use installer::InstallerUploadAction;
pub use network::{render_ifcfg, NetworkConfigAction};

use crate::ActionEngine;

/// Runs before [`PROVISIONING_SEQUENCE`] when the image has an installer
pub const INSTALLER_ACTION: &str = "installer-upload";

/// The order provisioning runs the guest actions in
pub const PROVISIONING_SEQUENCE: [&str; 3] = ["network-config", "disk-attach", "desktop-install"];

pub fn register_all(engine: &mut ActionEngine) {
    engine.register(InstallerUploadAction);
    engine.register(NetworkConfigAction);
    engine.register(DiskAttachAction);
    engine.register(DesktopInstallAction);
}

/// Create an engine with all guest actions pre-registered
pub fn create_engine_with_actions() -> ActionEngine {
    let mut engine = ActionEngine::new();
    register_all(&mut engine);
    engine
}
