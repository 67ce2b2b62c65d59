//! Worker and server configuration
//!
//! Loaded from a TOML file whose every field has a default, then
//! overridden by `KESTREL_*` environment variables for secrets and
//! endpoints. Durations are stored as whole seconds.

use crate::error::Error;
use crate::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Where the binary looks when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kestrel/config.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct KestrelConfig {
    pub appliance: ApplianceConfig,
    pub guest: GuestConfig,
    pub guest_agent: GuestAgentConfig,
    pub desktop: DesktopConfig,
    pub worker: WorkerConfig,
    pub server: ServerConfig,
}

/// What is being deployed and how big it is
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplianceConfig {
    /// Resource name used in routes and task names
    pub resource: String,
    /// Value of the `component` metadata tag
    pub component: String,
    /// Filename prefix of image artifacts (`<prefix>-<version>.ova`)
    pub image_prefix: String,
    pub images_dir: PathBuf,
    pub cpu_count: u32,
    pub ram_gb: u32,
    /// Size of the extra data disk attached during provisioning
    pub disk_size_gb: u64,
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            resource: "appliance".to_string(),
            component: "Appliance".to_string(),
            image_prefix: "appliance".to_string(),
            images_dir: PathBuf::from("/images"),
            cpu_count: 4,
            ram_gb: 32,
            disk_size_gb: 250,
        }
    }
}

/// Credentials and command defaults for talking to the guest OS
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuestConfig {
    pub user: String,
    pub password: String,
    pub nic_device: String,
    /// Writable directory uploads land in before being moved into place
    pub staging_dir: String,
    pub shell: String,
    /// Log non-zero exits instead of failing the provisioning run
    pub continue_on_command_failure: bool,
    pub command_timeout_secs: u64,
    /// How long a process start may wait for the guest agent
    pub init_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            user: "administrator".to_string(),
            password: String::new(),
            nic_device: "ens192".to_string(),
            staging_dir: "/home/administrator".to_string(),
            shell: "/usr/bin/bash".to_string(),
            continue_on_command_failure: true,
            command_timeout_secs: 600,
            init_timeout_secs: 60,
            poll_interval_secs: 1,
        }
    }
}

impl GuestConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Retry policy while the guest agent boots
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuestAgentConfig {
    pub attempts: u32,
    /// Sleep before retry `n` is `n * backoff_step`
    pub backoff_step_secs: u64,
}

impl Default for GuestAgentConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff_step_secs: 1,
        }
    }
}

impl GuestAgentConfig {
    /// At least one attempt, even if configured lower
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_secs(self.backoff_step_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DesktopConfig {
    /// Fixed wait after the reboot before the guest agent is used again
    pub reboot_settle_secs: u64,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            reboot_settle_secs: 60,
        }
    }
}

impl DesktopConfig {
    /// Never shorter than one second, even if configured lower
    pub fn reboot_settle(&self) -> Duration {
        Duration::from_secs(self.reboot_settle_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_depth: usize,
    /// How long a finished task's response stays pollable
    pub result_retention_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_depth: 64,
            result_retention_secs: 3600,
        }
    }
}

impl WorkerConfig {
    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Public URL prefix used in `Link` headers
    pub base_url: String,
    /// API token to username
    pub tokens: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            base_url: "https://localhost".to_string(),
            tokens: HashMap::new(),
        }
    }
}

impl KestrelConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_PATH`] if it exists
    ///
    /// An explicitly given path must exist; a missing default file just
    /// means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!(path = DEFAULT_CONFIG_PATH, "No config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Override secrets and endpoints from the environment
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup("KESTREL_GUEST_USER") {
            self.guest.user = user;
        }
        if let Some(password) = lookup("KESTREL_GUEST_PASSWORD") {
            self.guest.password = password;
        }
        if let Some(dir) = lookup("KESTREL_IMAGES_DIR") {
            self.appliance.images_dir = PathBuf::from(dir);
        }
        if let Some(listen) = lookup("KESTREL_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(base_url) = lookup("KESTREL_BASE_URL") {
            self.server.base_url = base_url;
        }
    }
}
