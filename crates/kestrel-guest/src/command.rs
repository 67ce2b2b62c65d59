//! Remote command execution through the guest agent
//!
//! Every command runs as a single shell invocation, `<shell> -c "<command>"`,
//! so pipes and quoting behave as they would on a terminal. Starting the
//! process waits out the guest agent's boot window; completion is observed by
//! polling the exit code.
//!
//! Non-zero exits and timeouts are governed by [`CommandPolicy`]. With the
//! default lenient policy they are logged and returned as an outcome, which
//! lets a provisioning run continue past a flaky package mirror. The strict
//! policy turns them into errors.

use crate::error::{ActionError, Result};
use kestrel_common::config::GuestConfig;
use kestrel_hypervisor::{Credentials, GuestProgram, Hypervisor, HypervisorError, VmRef};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Delay between process start attempts while the guest agent boots
const START_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// What to do when a command exits non-zero or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPolicy {
    pub continue_on_failure: bool,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            continue_on_failure: true,
        }
    }
}

impl CommandPolicy {
    pub fn strict() -> Self {
        Self {
            continue_on_failure: false,
        }
    }

    pub fn from_config(guest: &GuestConfig) -> Self {
        Self {
            continue_on_failure: guest.continue_on_command_failure,
        }
    }
}

/// One command to run in the guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub shell: String,
    pub command: String,
    pub args: Vec<String>,
    pub sudo: bool,
    /// How long the command may run once started
    pub timeout: Duration,
    /// How long starting may wait for the guest agent
    pub init_timeout: Duration,
    /// Return right after the start, without waiting for an exit code
    pub one_shot: bool,
}

impl CommandSpec {
    pub fn new(shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            command: command.into(),
            args: Vec::new(),
            sudo: false,
            timeout: Duration::from_secs(600),
            init_timeout: Duration::from_secs(60),
            one_shot: false,
        }
    }

    /// Append one argument, quoted so the shell passes it through unchanged
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    /// The command line as the shell will see it
    pub fn command_line(&self) -> String {
        let mut line = String::new();
        if self.sudo {
            line.push_str("sudo ");
        }
        line.push_str(&self.command);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line
    }

    /// Program and argument string handed to the guest agent
    pub fn program(&self) -> GuestProgram {
        GuestProgram {
            path: self.shell.clone(),
            arguments: format!("-c \"{}\"", escape(&self.command_line())),
        }
    }
}

/// Single-quote `arg` unless every character is one the shell leaves alone
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@+%".contains(c));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Escape for the double-quoted `-c` wrapper
fn escape(line: &str) -> String {
    let mut escaped = String::with_capacity(line.len());
    for c in line.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// How a command ended, as far as the policy lets it be observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed { code: i32 },
    TimedOut { after: Duration },
    /// Started as one-shot; nobody waited for it
    Detached { pid: i64 },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Succeeded | CommandOutcome::Detached { .. })
    }
}

pub struct CommandRunner<'a> {
    hypervisor: &'a dyn Hypervisor,
    guest: &'a GuestConfig,
    policy: CommandPolicy,
}

impl<'a> CommandRunner<'a> {
    pub fn new(hypervisor: &'a dyn Hypervisor, guest: &'a GuestConfig, policy: CommandPolicy) -> Self {
        Self {
            hypervisor,
            guest,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> CommandPolicy {
        self.policy
    }

    /// A spec with the configured shell and timeouts
    pub fn command(&self, command: impl Into<String>) -> CommandSpec {
        CommandSpec::new(&self.guest.shell, command)
            .timeout(self.guest.command_timeout())
            .init_timeout(self.guest.init_timeout())
    }

    pub async fn run(
        &self,
        vm: &VmRef,
        spec: &CommandSpec,
        creds: &Credentials,
    ) -> Result<CommandOutcome> {
        let program = spec.program();
        let command = spec.command_line();

        let pid = self.start(vm, &program, spec.init_timeout, creds).await?;
        debug!(vm = %vm.name, pid, command = %command, "Started guest process");

        if spec.one_shot {
            info!(vm = %vm.name, pid, command = %command, "Issued one-shot command");
            return Ok(CommandOutcome::Detached { pid });
        }

        let outcome = self.wait(vm, pid, &command, spec.timeout, creds).await?;
        self.apply_policy(vm, &command, outcome)
    }

    async fn start(
        &self,
        vm: &VmRef,
        program: &GuestProgram,
        init_timeout: Duration,
        creds: &Credentials,
    ) -> Result<i64> {
        let deadline = Instant::now() + init_timeout;
        loop {
            match self.hypervisor.start_process(vm, creds, program).await {
                Ok(pid) => return Ok(pid),
                Err(HypervisorError::GuestOperationsUnavailable) => {
                    if Instant::now() >= deadline {
                        return Err(ActionError::GuestUnavailable {
                            vm: vm.name.clone(),
                        });
                    }
                    debug!(vm = %vm.name, "Guest agent not ready, retrying process start");
                    tokio::time::sleep(START_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn wait(
        &self,
        vm: &VmRef,
        pid: i64,
        command: &str,
        timeout: Duration,
        creds: &Credentials,
    ) -> Result<CommandOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.hypervisor.process_exit_code(vm, creds, pid).await {
                Ok(Some(0)) => return Ok(CommandOutcome::Succeeded),
                Ok(Some(code)) => return Ok(CommandOutcome::Failed { code }),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return Ok(CommandOutcome::TimedOut { after: timeout });
                    }
                    tokio::time::sleep(self.guest.poll_interval()).await;
                }
                Err(HypervisorError::ProcessNotListed { pid }) => {
                    return Err(ActionError::ProcessNotListed {
                        command: command.to_string(),
                        pid,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn apply_policy(
        &self,
        vm: &VmRef,
        command: &str,
        outcome: CommandOutcome,
    ) -> Result<CommandOutcome> {
        match outcome {
            CommandOutcome::Failed { code } => {
                error!(vm = %vm.name, code, command = %command, "Guest command failed");
                if !self.policy.continue_on_failure {
                    return Err(ActionError::CommandFailed {
                        command: command.to_string(),
                        code,
                    });
                }
            }
            CommandOutcome::TimedOut { after } => {
                error!(vm = %vm.name, timeout = ?after, command = %command, "Guest command timed out");
                if !self.policy.continue_on_failure {
                    return Err(ActionError::CommandTimeout {
                        command: command.to_string(),
                        timeout: after,
                    });
                }
            }
            CommandOutcome::Succeeded | CommandOutcome::Detached { .. } => {
                debug!(vm = %vm.name, command = %command, "Guest command succeeded");
            }
        }
        Ok(outcome)
    }
}
