//! Provisioning orchestrator
//!
//! [`Provisioner`] drives the hypervisor and the guest actions through the
//! `create` pipeline and implements the `delete`, `show` and `images`
//! operations around it.
//!
//! `create` runs strictly in order and stops at the first error. Nothing is
//! rolled back: a VM that was deployed before the failure stays in place so
//! it can be inspected or deleted.

use crate::catalog::ImageCatalog;
use crate::error::{ProvisionError, Result};
use kestrel_common::network::validate_hostname;
use kestrel_common::{Inventory, InstanceMeta, KestrelConfig, NetworkConfig, PowerState};
use kestrel_guest::actions::{self, INSTALLER_ACTION, PROVISIONING_SEQUENCE};
use kestrel_guest::{ActionContext, ActionEngine, Progress, ProgressReporter};
use kestrel_hypervisor::{DeployRequest, Hypervisor, UploadClient, VmRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Step of the `create` pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolving,
    Deploying,
    Sizing,
    Tagging,
    InstallerUploading,
    NetworkConfiguring,
    DiskAttaching,
    DesktopInstalling,
    Inspecting,
    Done,
}

impl Stage {
    /// Stage that runs the given guest action
    fn for_action(action: &str) -> Option<Stage> {
        match action {
            "installer-upload" => Some(Stage::InstallerUploading),
            "network-config" => Some(Stage::NetworkConfiguring),
            "disk-attach" => Some(Stage::DiskAttaching),
            "desktop-install" => Some(Stage::DesktopInstalling),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolving => "resolving",
            Stage::Deploying => "deploying",
            Stage::Sizing => "sizing",
            Stage::Tagging => "tagging",
            Stage::InstallerUploading => "installer_uploading",
            Stage::NetworkConfiguring => "network_configuring",
            Stage::DiskAttaching => "disk_attaching",
            Stage::DesktopInstalling => "desktop_installing",
            Stage::Inspecting => "inspecting",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Event emitted while provisioning
#[derive(Debug, Clone)]
pub enum ProvisionEvent {
    StageChanged { instance: String, stage: Stage },
    ActionProgress {
        instance: String,
        action: String,
        progress: Progress,
    },
    Completed { instance: String, success: bool },
}

/// Everything `create` needs to know about the new instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub owner: String,
    pub name: String,
    /// Image version, resolved through the catalog
    pub image: String,
    /// Full hypervisor network name
    pub network: String,
    pub network_config: NetworkConfig,
}

impl CreateRequest {
    /// Parameters handed to the guest actions
    fn action_environment(&self) -> Vec<(&'static str, String)> {
        let dns: Vec<String> = self
            .network_config
            .dns
            .iter()
            .map(|server| server.to_string())
            .collect();
        vec![
            ("STATIC_IP", self.network_config.static_ip.to_string()),
            ("DEFAULT_GATEWAY", self.network_config.default_gateway.to_string()),
            ("NETMASK", self.network_config.netmask.to_string()),
            ("DNS", dns.join(",")),
        ]
    }
}

pub struct Provisioner {
    hypervisor: Arc<dyn Hypervisor>,
    uploader: Arc<dyn UploadClient>,
    catalog: ImageCatalog,
    config: Arc<KestrelConfig>,
    engine: ActionEngine,
    event_sender: broadcast::Sender<ProvisionEvent>,
}

impl Provisioner {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        uploader: Arc<dyn UploadClient>,
        config: Arc<KestrelConfig>,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(1024);
        Self {
            hypervisor,
            uploader,
            catalog: ImageCatalog::from_config(&config.appliance),
            config,
            engine: actions::create_engine_with_actions(),
            event_sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent> {
        self.event_sender.subscribe()
    }

    pub fn config(&self) -> &KestrelConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    /// Component tag that marks VMs as ours
    fn component(&self) -> &str {
        &self.config.appliance.component
    }

    fn enter(&self, instance: &str, stage: Stage) {
        info!(instance, stage = %stage, "Provisioning stage");
        let _ = self.event_sender.send(ProvisionEvent::StageChanged {
            instance: instance.to_string(),
            stage,
        });
    }

    /// Deploy and fully configure a new instance
    pub async fn create(&self, request: &CreateRequest) -> Result<Inventory> {
        let result = self.run_create(request).await;

        let success = result.is_ok();
        if let Err(e) = &result {
            error!(instance = %request.name, kind = %e.kind(), error = %e, "Provisioning failed");
        }
        let _ = self.event_sender.send(ProvisionEvent::Completed {
            instance: request.name.clone(),
            success,
        });
        result
    }

    async fn run_create(&self, request: &CreateRequest) -> Result<Inventory> {
        let name = request.name.as_str();
        validate_hostname(name)?;
        request.network_config.validate()?;

        self.enter(name, Stage::Resolving);
        let image = self.catalog.resolve(&request.image).await?;
        let installer = self.catalog.resolve_installer(&request.image).await?;
        debug!(instance = name, image = %image.display(), installer = ?installer, "Resolved image");

        self.enter(name, Stage::Deploying);
        let network = self
            .hypervisor
            .network(&request.network)
            .await?
            .ok_or_else(|| ProvisionError::NetworkNotFound(request.network.clone()))?;
        let vm = self
            .hypervisor
            .deploy(&DeployRequest {
                owner: request.owner.clone(),
                name: request.name.clone(),
                image,
                network,
            })
            .await?;

        self.enter(name, Stage::Sizing);
        let appliance = &self.config.appliance;
        self.hypervisor.set_cpu(&vm, appliance.cpu_count).await?;
        self.hypervisor.set_ram(&vm, appliance.ram_gb).await?;
        self.hypervisor.power(&vm, PowerState::On).await?;

        self.enter(name, Stage::Tagging);
        let meta = InstanceMeta::new(self.component(), &request.image, unix_now());
        self.hypervisor.set_meta(&vm, &meta).await?;

        if let Some(installer) = &installer {
            self.enter(name, Stage::InstallerUploading);
            let env = [("INSTALLER_PATH", installer.display().to_string())];
            self.run_action(INSTALLER_ACTION, &vm, request, &env).await?;
        }

        for action in PROVISIONING_SEQUENCE {
            if let Some(stage) = Stage::for_action(action) {
                self.enter(name, stage);
            }
            self.run_action(action, &vm, request, &[]).await?;
        }

        self.enter(name, Stage::Inspecting);
        let info = self.hypervisor.get_info(&vm, true).await?;

        self.enter(name, Stage::Done);
        Ok(Inventory::from([(request.name.clone(), info)]))
    }

    async fn run_action(
        &self,
        action: &str,
        vm: &VmRef,
        request: &CreateRequest,
        extra_env: &[(&str, String)],
    ) -> Result<()> {
        let reporter = Arc::new(EventProgressReporter {
            instance: request.name.clone(),
            action: action.to_string(),
            sender: self.event_sender.clone(),
        });

        let mut ctx = ActionContext::new(
            self.hypervisor.clone(),
            self.uploader.clone(),
            self.config.clone(),
            vm.clone(),
        )
        .with_progress_reporter(reporter);
        for (key, value) in request.action_environment() {
            ctx = ctx.with_env(key, value);
        }
        for (key, value) in extra_env {
            ctx = ctx.with_env(*key, value.clone());
        }

        let result = self
            .engine
            .execute(action, &ctx)
            .await
            .map_err(|source| ProvisionError::ActionFailed {
                action: action.to_string(),
                source,
            })?;
        info!(instance = %request.name, action, duration = ?result.duration, "{}", result.message);
        Ok(())
    }

    /// Power off and destroy one of the owner's instances
    ///
    /// Only VMs carrying our component tag are eligible; a same-named VM
    /// with another tag is left alone and reported as not found.
    pub async fn delete(&self, owner: &str, name: &str) -> Result<Inventory> {
        let not_found = || ProvisionError::InstanceNotFound {
            component: self.component().to_string(),
            name: name.to_string(),
        };

        let vm = self
            .hypervisor
            .list_vms(owner)
            .await?
            .into_iter()
            .find(|vm| vm.name == name)
            .ok_or_else(not_found)?;

        let meta = self.hypervisor.get_meta(&vm).await?;
        if meta.map(|meta| meta.component) != Some(self.component().to_string()) {
            return Err(not_found());
        }

        info!(instance = name, owner, "Destroying instance");
        self.hypervisor.power(&vm, PowerState::Off).await?;
        self.hypervisor.destroy(&vm).await?;
        Ok(Inventory::new())
    }

    /// Every instance the owner has, keyed by name
    pub async fn show(&self, owner: &str) -> Result<Inventory> {
        let mut inventory = Inventory::new();
        for vm in self.hypervisor.list_vms(owner).await? {
            let info = self.hypervisor.get_info(&vm, false).await?;
            if info.is_component(self.component()) {
                inventory.insert(vm.name, info);
            }
        }
        debug!(owner, count = inventory.len(), "Listed instances");
        Ok(inventory)
    }

    /// Image versions available for `create`
    pub async fn images(&self) -> Result<BTreeSet<String>> {
        self.catalog.list_versions().await
    }
}

impl fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("catalog", &self.catalog)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Forwards action progress onto the event stream
struct EventProgressReporter {
    instance: String,
    action: String,
    sender: broadcast::Sender<ProvisionEvent>,
}

impl ProgressReporter for EventProgressReporter {
    fn report(&self, progress: Progress) {
        let _ = self.sender.send(ProvisionEvent::ActionProgress {
            instance: self.instance.clone(),
            action: self.action.clone(),
            progress,
        });
    }
}

fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
