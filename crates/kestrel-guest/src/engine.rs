//! Action execution engine
//!
//! The [`ActionEngine`] keeps a registry of guest actions and runs them with
//! validation, timeout handling and progress reporting.

use crate::context::{ActionContext, ActionResult};
use crate::error::{ActionError, Result};
use crate::progress::Progress;
use crate::traits::Action;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

/// Registry and runner for guest actions
///
/// # Example
///
/// ```ignore
/// use kestrel_guest::{actions, ActionEngine};
///
/// let engine = actions::create_engine_with_actions();
/// let result = engine.execute("network-config", &ctx).await?;
/// ```
pub struct ActionEngine {
    actions: HashMap<String, Arc<dyn Action>>,

    /// Applied when neither the context nor the action sets a timeout
    default_timeout: Option<Duration>,
}

impl Default for ActionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionEngine {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            default_timeout: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn register<A: Action + 'static>(&mut self, action: A) {
        let name = action.name().to_string();
        self.actions.insert(name, Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    /// Execute an action by name
    ///
    /// Validates the parameters, reports start and end progress and
    /// enforces the first timeout found on the context, the action or the
    /// engine.
    pub async fn execute(&self, action_name: &str, ctx: &ActionContext) -> Result<ActionResult> {
        let action = self
            .actions
            .get(action_name)
            .ok_or_else(|| ActionError::NotFound(action_name.to_string()))?;

        self.execute_action(action.clone(), ctx).await
    }

    /// Run an already resolved action inside its own span
    pub async fn execute_action(
        &self,
        action: Arc<dyn Action>,
        ctx: &ActionContext,
    ) -> Result<ActionResult> {
        let span = info_span!("action", action = %action.name(), vm = %ctx.vm().name);
        self.run(action, ctx).instrument(span).await
    }

    async fn run(&self, action: Arc<dyn Action>, ctx: &ActionContext) -> Result<ActionResult> {
        let action_name = action.name().to_string();

        action.validate(ctx)?;

        ctx.progress_reporter()
            .report(Progress::starting(&action_name));
        debug!(description = action.description(), "Executing action");

        let start = Instant::now();

        let action_timeout = ctx
            .timeout()
            .or_else(|| action.default_timeout())
            .or(self.default_timeout);

        let result = if let Some(timeout_duration) = action_timeout {
            match timeout(timeout_duration, action.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::Timeout(timeout_duration)),
            }
        } else {
            action.execute(ctx).await
        };

        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                info!(elapsed = ?elapsed, "Action completed");
                ctx.progress_reporter()
                    .report(Progress::completed(&action_name));
            }
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "Action failed");
                ctx.progress_reporter().report(Progress::new(
                    &action_name,
                    0,
                    format!("Failed: {}", e),
                ));
            }
        }

        result.map(|r| r.with_duration(elapsed))
    }
}

impl std::fmt::Debug for ActionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEngine")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
