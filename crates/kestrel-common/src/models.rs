use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle metadata stored on every appliance VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMeta {
    /// Which product this generic VM represents
    pub component: String,
    /// Unix timestamp (seconds) of creation
    pub created: f64,
    /// Image version the VM was deployed from
    pub version: String,
    /// Whether first-boot configuration inside the appliance has run
    pub configured: bool,
    pub generation: u32,
}

impl InstanceMeta {
    /// Metadata for a freshly deployed, not yet configured instance
    pub fn new(component: impl Into<String>, version: impl Into<String>, created: f64) -> Self {
        Self {
            component: component.into(),
            created,
            version: version.into(),
            configured: false,
            generation: 1,
        }
    }
}

/// VM power state as reported by the hypervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    Suspended,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Suspended => write!(f, "suspended"),
        }
    }
}

/// What inventory reports for one VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub state: PowerState,
    /// URL of the VM's web console
    pub console: String,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    /// `None` for VMs that were never tagged
    pub meta: Option<InstanceMeta>,
}

impl InstanceInfo {
    /// Whether this VM carries the given component tag
    pub fn is_component(&self, component: &str) -> bool {
        self.meta
            .as_ref()
            .map(|meta| meta.component == component)
            .unwrap_or(false)
    }
}

/// Instance name to instance info, as returned by `create` and `show`
pub type Inventory = BTreeMap<String, InstanceInfo>;

/// Size of an additional data disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub size_gb: u64,
}

impl DiskSpec {
    /// Capacity in KiB, `None` if it does not fit in a `u64`
    pub fn capacity_kb(&self) -> Option<u64> {
        self.size_gb.checked_mul(1024 * 1024)
    }
}

/// Body every task returns, success or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub content: Value,
    pub error: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskResponse {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            error: None,
            params: Map::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            content: Value::Object(Map::new()),
            error: Some(message.into()),
            params: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(meta: Option<InstanceMeta>) -> InstanceInfo {
        InstanceInfo {
            state: PowerState::On,
            console: "https://vcenter/console".to_string(),
            ips: vec!["10.7.7.2".to_string()],
            networks: vec!["alice_lan1".to_string()],
            meta,
        }
    }

    #[test]
    fn test_new_meta_is_unconfigured_first_generation() {
        let meta = InstanceMeta::new("Appliance", "1.0.0", 1234.0);
        assert!(!meta.configured);
        assert_eq!(meta.generation, 1);
    }

    #[test]
    fn test_is_component() {
        assert!(info(Some(InstanceMeta::new("Appliance", "1.0.0", 0.0))).is_component("Appliance"));
        assert!(!info(Some(InstanceMeta::new("Jumpbox", "1.0.0", 0.0))).is_component("Appliance"));
        assert!(!info(None).is_component("Appliance"));
    }

    #[test]
    fn test_disk_capacity() {
        assert_eq!(DiskSpec { size_gb: 1 }.capacity_kb(), Some(1_048_576));
        assert_eq!(DiskSpec { size_gb: u64::MAX }.capacity_kb(), None);
    }

    #[test]
    fn test_task_response_shape() {
        let resp = TaskResponse::failed("No appliance named box9 found");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"content": {}, "error": "No appliance named box9 found", "params": {}})
        );

        let resp = TaskResponse::ok(json!({"image": ["1.0.0"]}));
        assert!(resp.is_success());
        assert_eq!(serde_json::to_value(&resp).unwrap()["error"], Value::Null);
    }

    #[test]
    fn test_power_state_serialization() {
        assert_eq!(serde_json::to_string(&PowerState::Off).unwrap(), "\"off\"");
        assert_eq!(PowerState::Suspended.to_string(), "suspended");
    }
}
