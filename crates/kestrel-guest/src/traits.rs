//! Action trait definition
//!
//! Each guest-side provisioning step is an [`Action`]: a named unit that
//! reads its parameters from the context environment and drives the guest
//! through the hypervisor.

use crate::context::{ActionContext, ActionResult};
use crate::error::{ActionError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Core trait for guest actions
///
/// # Example
///
/// ```ignore
/// use kestrel_guest::{Action, ActionContext, ActionResult, Result};
/// use async_trait::async_trait;
///
/// struct HostnameAction;
///
/// #[async_trait]
/// impl Action for HostnameAction {
///     fn name(&self) -> &str {
///         "hostname"
///     }
///
///     fn description(&self) -> &str {
///         "Prints the guest hostname"
///     }
///
///     async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
///         let spec = ctx.commands().command("hostname");
///         ctx.commands().run(ctx.vm(), &spec, ctx.credentials()).await?;
///         Ok(ActionResult::success("done"))
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    /// Name used for registration and lookup
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult>;

    /// Upper bound for the whole action; `None` waits forever
    ///
    /// Individual guest commands carry their own timeouts regardless.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }

    /// Check parameters before anything touches the guest
    ///
    /// The default checks that every required environment variable is set.
    fn validate(&self, ctx: &ActionContext) -> Result<()> {
        for key in self.required_env_vars() {
            if ctx.env(key).is_none() {
                return Err(ActionError::MissingEnvVar(key.to_string()));
            }
        }
        Ok(())
    }

    fn required_env_vars(&self) -> Vec<&str> {
        vec![]
    }

    fn optional_env_vars(&self) -> Vec<&str> {
        vec![]
    }
}
