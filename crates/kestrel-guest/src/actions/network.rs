//! Static network configuration
//!
//! Renders an `ifcfg` file for the primary NIC, uploads it to a staging
//! path and moves it into place, then restarts networking and sets the
//! hostname to the instance name. The move keeps a half-written file from
//! ever appearing under `network-scripts`.

use crate::context::{ActionContext, ActionResult};
use crate::error::Result;
use crate::progress::Progress;
use crate::traits::Action;
use async_trait::async_trait;
use kestrel_common::network::validate_hostname;
use kestrel_common::NetworkConfig;
use std::fmt::Write;
use tracing::info;

const NETWORK_SCRIPTS_DIR: &str = "/etc/sysconfig/network-scripts";

/// Configure a static address on the guest's primary NIC
///
/// Environment variables:
/// - `STATIC_IP` (required)
/// - `DEFAULT_GATEWAY` (required)
/// - `NETMASK` (required)
/// - `DNS` (optional): comma separated DNS servers, in order
/// - `NIC_DEVICE` (optional): defaults to `guest.nic_device`
pub struct NetworkConfigAction;

impl NetworkConfigAction {
    fn network_config(ctx: &ActionContext) -> Result<NetworkConfig> {
        let dns: Vec<String> = ctx
            .env("DNS")
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(NetworkConfig::parse(
            ctx.require_env("STATIC_IP")?,
            ctx.require_env("DEFAULT_GATEWAY")?,
            ctx.require_env("NETMASK")?,
            &dns,
        )?)
    }
}

#[async_trait]
impl Action for NetworkConfigAction {
    fn name(&self) -> &str {
        "network-config"
    }

    fn description(&self) -> &str {
        "Install a static network configuration and set the hostname"
    }

    fn required_env_vars(&self) -> Vec<&str> {
        vec!["STATIC_IP", "DEFAULT_GATEWAY", "NETMASK"]
    }

    fn optional_env_vars(&self) -> Vec<&str> {
        vec!["DNS", "NIC_DEVICE"]
    }

    fn validate(&self, ctx: &ActionContext) -> Result<()> {
        validate_hostname(&ctx.vm().name)?;
        Self::network_config(ctx).map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let network = Self::network_config(ctx)?;
        let device = ctx
            .env("NIC_DEVICE")
            .unwrap_or(ctx.config().guest.nic_device.as_str());
        let vm = ctx.vm();
        let reporter = ctx.progress_reporter();

        let file_name = format!("ifcfg-{}", device);
        let staging = format!(
            "{}/{}",
            ctx.config().guest.staging_dir.trim_end_matches('/'),
            file_name
        );
        let target = format!("{}/{}", NETWORK_SCRIPTS_DIR, file_name);

        reporter.report(Progress::new(self.name(), 10, "Uploading interface config"));
        let contents = render_ifcfg(device, &network);
        ctx.file_transfer()
            .upload(vm, &staging, contents.into_bytes(), ctx.credentials())
            .await?;

        reporter.report(Progress::new(self.name(), 50, "Applying network settings"));
        let runner = ctx.commands();
        let commands = [
            runner.command("/bin/mv -f").arg(staging.as_str()).arg(target.as_str()),
            runner.command("/bin/systemctl restart network"),
            runner
                .command("/usr/bin/hostnamectl set-hostname")
                .arg(vm.name.as_str()),
        ];
        for command in &commands {
            runner.run(vm, command, ctx.credentials()).await?;
        }

        info!(
            vm = %vm.name,
            device,
            ip = %network.static_ip,
            gateway = %network.default_gateway,
            "Configured static network"
        );

        Ok(ActionResult::success(format!(
            "Configured {} on {}",
            network.static_ip, device
        ))
        .with_output("device", device)
        .with_output("path", target))
    }
}

/// Render a complete `ifcfg-<device>` file
pub fn render_ifcfg(device: &str, network: &NetworkConfig) -> String {
    let mut contents = String::new();
    let _ = writeln!(contents, "TYPE=Ethernet");
    let _ = writeln!(contents, "BOOTPROTO=static");
    let _ = writeln!(contents, "DEFROUTE=yes");
    let _ = writeln!(contents, "NAME={}", device);
    let _ = writeln!(contents, "DEVICE={}", device);
    let _ = writeln!(contents, "ONBOOT=yes");
    let _ = writeln!(contents, "IPADDR={}", network.static_ip);
    let _ = writeln!(contents, "NETMASK={}", network.netmask);
    let _ = writeln!(contents, "GATEWAY={}", network.default_gateway);
    for (idx, server) in network.dns.iter().enumerate() {
        let _ = writeln!(contents, "DNS{}={}", idx + 1, server);
    }
    contents
}
