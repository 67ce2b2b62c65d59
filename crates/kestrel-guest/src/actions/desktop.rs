//! Graphical desktop and remote access
//!
//! Installs GNOME, makes it the default target, reboots into it and then
//! sets up xrdp so the appliance can be reached over RDP. The reboot tears
//! down the guest agent channel, so it is issued one-shot and followed by a
//! fixed settle time before the next command.

use crate::command::CommandSpec;
use crate::context::{ActionContext, ActionResult};
use crate::error::{ActionError, Result};
use crate::progress::Progress;
use crate::traits::Action;
use async_trait::async_trait;
use tracing::{info, warn};

const GROUPINSTALL: &str =
    r#"yum -y groupinstall "GNOME Desktop" "Graphical Administration Tools""#;

const VERIFY_GROUPINSTALL: &str = r#"yum group list installed | grep "GNOME Desktop""#;

/// Commands run after the guest is back from the reboot
const REMOTE_ACCESS: &[&str] = &[
    "yum -y install xrdp tigervnc-server",
    "systemctl enable xrdp",
    "systemctl start xrdp",
    "firewall-cmd --permanent --add-port=3389/tcp",
    "firewall-cmd --reload",
    "chcon --type=bin_t /usr/sbin/xrdp",
    "chcon --type=bin_t /usr/sbin/xrdp-sesman",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Desktop group install, confirmed by a separate query
    Groupinstall,
    Run(&'static str),
    /// One-shot reboot plus settle time
    Reboot,
}

impl Step {
    fn label(&self) -> &'static str {
        match *self {
            Step::Groupinstall => "groupinstall",
            Step::Run(command) => command,
            Step::Reboot => "reboot",
        }
    }
}

fn steps() -> Vec<Step> {
    let mut steps = vec![
        Step::Groupinstall,
        Step::Run("systemctl set-default graphical.target"),
        Step::Run("yum -y install epel-release"),
        Step::Run("systemctl disable libvirtd"),
        Step::Reboot,
    ];
    steps.extend(REMOTE_ACCESS.iter().copied().map(Step::Run));
    steps
}

/// Install a desktop environment and xrdp inside the guest
pub struct DesktopInstallAction;

impl DesktopInstallAction {
    async fn run(
        &self,
        ctx: &ActionContext,
        spec: CommandSpec,
        failed: &mut Vec<String>,
    ) -> Result<()> {
        let outcome = ctx.commands().run(ctx.vm(), &spec, ctx.credentials()).await?;
        if !outcome.is_success() {
            failed.push(spec.command_line());
        }
        Ok(())
    }

    async fn groupinstall(&self, ctx: &ActionContext, failed: &mut Vec<String>) -> Result<()> {
        let runner = ctx.commands();
        match runner
            .run(ctx.vm(), &runner.command(GROUPINSTALL), ctx.credentials())
            .await
        {
            Ok(_) => {}
            // The guest agent sometimes loses track of long package
            // transactions; the verification below decides.
            Err(ActionError::ProcessNotListed { pid, .. }) => {
                warn!(vm = %ctx.vm().name, pid, "Desktop install dropped from process listing");
            }
            Err(e) => return Err(e),
        }
        self.run(ctx, runner.command(VERIFY_GROUPINSTALL), failed).await
    }

    async fn reboot(&self, ctx: &ActionContext) -> Result<()> {
        let runner = ctx.commands();
        runner
            .run(ctx.vm(), &runner.command("shutdown -r now").one_shot(), ctx.credentials())
            .await?;

        let settle = ctx.config().desktop.reboot_settle();
        info!(vm = %ctx.vm().name, settle = ?settle, "Waiting for guest to come back from reboot");
        tokio::time::sleep(settle).await;
        Ok(())
    }
}

#[async_trait]
impl Action for DesktopInstallAction {
    fn name(&self) -> &str {
        "desktop-install"
    }

    fn description(&self) -> &str {
        "Install GNOME and xrdp for remote desktop access"
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let steps = steps();
        let total = steps.len() as u32;
        let mut failed = Vec::new();

        for (idx, step) in steps.into_iter().enumerate() {
            ctx.progress_reporter().report(
                Progress::new(self.name(), 0, step.label()).with_phase(
                    step.label(),
                    idx as u32 + 1,
                    total,
                ),
            );

            match step {
                Step::Groupinstall => self.groupinstall(ctx, &mut failed).await?,
                Step::Run(command) => {
                    let spec = ctx.commands().command(command);
                    self.run(ctx, spec, &mut failed).await?
                }
                Step::Reboot => self.reboot(ctx).await?,
            }
        }

        if failed.is_empty() {
            info!(vm = %ctx.vm().name, "Desktop and remote access installed");
        } else {
            warn!(
                vm = %ctx.vm().name,
                failed = failed.len(),
                "Desktop install finished with failed commands"
            );
        }

        Ok(ActionResult::success("Desktop installed").with_output("failed_commands", failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandPolicy;
    use crate::test_support::{test_context, test_context_with};
    use kestrel_common::{ErrorKind, KestrelConfig};
    use std::time::Duration;

    fn shell_lines(hv: &kestrel_hypervisor::MemoryHypervisor) -> Vec<String> {
        hv.commands()
            .into_iter()
            .map(|c| {
                c.arguments
                    .strip_prefix("-c \"")
                    .and_then(|rest| rest.strip_suffix('"'))
                    .unwrap()
                    .replace("\\\"", "\"")
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sequence() {
        let (hv, ctx) = test_context();

        let start = tokio::time::Instant::now();
        let result = DesktopInstallAction.execute(&ctx).await.unwrap();

        assert_eq!(
            shell_lines(&hv),
            vec![
                r#"yum -y groupinstall "GNOME Desktop" "Graphical Administration Tools""#,
                r#"yum group list installed | grep "GNOME Desktop""#,
                "systemctl set-default graphical.target",
                "yum -y install epel-release",
                "systemctl disable libvirtd",
                "shutdown -r now",
                "yum -y install xrdp tigervnc-server",
                "systemctl enable xrdp",
                "systemctl start xrdp",
                "firewall-cmd --permanent --add-port=3389/tcp",
                "firewall-cmd --reload",
                "chcon --type=bin_t /usr/sbin/xrdp",
                "chcon --type=bin_t /usr/sbin/xrdp-sesman",
            ]
        );
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(
            result.get_output_as::<Vec<String>>("failed_commands"),
            Some(vec![])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlisted_groupinstall_falls_back_to_verification() {
        let (hv, ctx) = test_context();
        hv.unlist_process("groupinstall");

        DesktopInstallAction.execute(&ctx).await.unwrap();

        let lines = shell_lines(&hv);
        assert!(lines[1].starts_with("yum group list installed"));
        assert_eq!(lines.len(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_collected_under_lenient_policy() {
        let (hv, ctx) = test_context();
        hv.set_exit_code("libvirtd", 1);

        let result = DesktopInstallAction.execute(&ctx).await.unwrap();

        assert_eq!(
            result.get_output_as::<Vec<String>>("failed_commands"),
            Some(vec!["systemctl disable libvirtd".to_string()])
        );
        assert_eq!(hv.commands().len(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_policy_stops_at_first_failure() {
        let mut config = KestrelConfig::default();
        config.guest.continue_on_command_failure = false;
        let (hv, ctx) = test_context_with(config);
        assert_eq!(ctx.commands().policy(), CommandPolicy::strict());
        hv.set_exit_code("epel-release", 1);

        let err = DesktopInstallAction.execute(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CommandFailed);
        assert_eq!(hv.commands().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_settle_time() {
        let mut config = KestrelConfig::default();
        config.desktop.reboot_settle_secs = 5;
        let (_, ctx) = test_context_with(config);

        let start = tokio::time::Instant::now();
        DesktopInstallAction.execute(&ctx).await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(60));
    }
}
