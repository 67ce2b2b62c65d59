//! Action execution context and result types
//!
//! The context carries everything an action needs to reach one guest: the
//! hypervisor handle, the upload client, the target VM, guest credentials,
//! configuration and per-run parameters passed as environment variables.

use crate::command::{CommandPolicy, CommandRunner};
use crate::error::{ActionError, Result};
use crate::progress::{NoopReporter, ProgressReporter};
use crate::transfer::GuestFileTransfer;
use kestrel_common::KestrelConfig;
use kestrel_hypervisor::{Credentials, Hypervisor, UploadClient, VmRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Context provided to actions during execution
pub struct ActionContext {
    hypervisor: Arc<dyn Hypervisor>,
    uploader: Arc<dyn UploadClient>,
    config: Arc<KestrelConfig>,

    /// The VM being provisioned
    vm: VmRef,

    /// Guest OS login, taken from the `guest` config section
    credentials: Credentials,

    environment: HashMap<String, String>,
    progress_reporter: Arc<dyn ProgressReporter>,
    timeout: Option<Duration>,
}

impl ActionContext {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        uploader: Arc<dyn UploadClient>,
        config: Arc<KestrelConfig>,
        vm: VmRef,
    ) -> Self {
        let credentials = Credentials::new(&config.guest.user, &config.guest.password);
        Self {
            hypervisor,
            uploader,
            config,
            vm,
            credentials,
            environment: HashMap::new(),
            progress_reporter: Arc::new(NoopReporter),
            timeout: None,
        }
    }

    pub fn with_environment(mut self, env: HashMap<String, String>) -> Self {
        self.environment = env;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = reporter;
        self
    }

    /// Override every action's own timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn hypervisor(&self) -> &dyn Hypervisor {
        self.hypervisor.as_ref()
    }

    pub fn config(&self) -> &KestrelConfig {
        &self.config
    }

    pub fn vm(&self) -> &VmRef {
        &self.vm
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(|s| s.as_str())
    }

    /// Like [`env`](Self::env), but a missing variable is an error
    pub fn require_env(&self, key: &str) -> Result<&str> {
        self.env(key)
            .ok_or_else(|| ActionError::MissingEnvVar(key.to_string()))
    }

    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub fn progress_reporter(&self) -> &Arc<dyn ProgressReporter> {
        &self.progress_reporter
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Upload client with the configured guest-agent retry policy
    pub fn file_transfer(&self) -> GuestFileTransfer<'_> {
        GuestFileTransfer::new(
            self.hypervisor.as_ref(),
            self.uploader.as_ref(),
            &self.config.guest_agent,
        )
    }

    /// Command runner with the configured shell, timeouts and failure policy
    pub fn commands(&self) -> CommandRunner<'_> {
        CommandRunner::new(
            self.hypervisor.as_ref(),
            &self.config.guest,
            CommandPolicy::from_config(&self.config.guest),
        )
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("vm", &self.vm)
            .field("credentials", &self.credentials)
            .field("environment", &self.environment)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result returned from action execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,

    /// Human-readable message describing the outcome
    pub message: String,

    /// Action-specific output data
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output: HashMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output: HashMap::new(),
            duration: None,
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.output.insert(key.into(), json_value);
        }
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn get_output_as<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.output
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
