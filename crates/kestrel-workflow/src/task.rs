//! Task messages and their dispatch
//!
//! Every unit of work arrives as a [`TaskRequest`] named
//! `<resource>.<kind>`. A [`DispatchTable`] maps each [`TaskKind`] to exactly
//! one handler and is checked for completeness when it is built, so a worker
//! can never pick up a task nobody handles.

use crate::error::{ProvisionError, Result};
use crate::orchestrator::{CreateRequest, Provisioner};
use futures::future::BoxFuture;
use futures::FutureExt;
use kestrel_common::TaskResponse;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Show,
    Create,
    Delete,
    Image,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Show,
        TaskKind::Create,
        TaskKind::Delete,
        TaskKind::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Show => "show",
            TaskKind::Create => "create",
            TaskKind::Delete => "delete",
            TaskKind::Image => "image",
        }
    }

    /// Fully qualified task name, e.g. `appliance.create`
    pub fn task_name(&self, resource: &str) -> String {
        format!("{}.{}", resource, self.as_str())
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskRequest {
    Show { username: String },
    Create(CreateRequest),
    Delete { username: String, machine_name: String },
    Image,
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Show { .. } => TaskKind::Show,
            TaskRequest::Create(_) => TaskKind::Create,
            TaskRequest::Delete { .. } => TaskKind::Delete,
            TaskRequest::Image => TaskKind::Image,
        }
    }

    fn mismatch(self, expected: TaskKind) -> ProvisionError {
        ProvisionError::InvalidTask(format!(
            "{} handler received a {} request",
            expected,
            self.kind()
        ))
    }
}

pub type Handler = fn(Arc<Provisioner>, TaskRequest) -> BoxFuture<'static, Result<Value>>;

#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: Vec<(TaskKind, Handler)>,
}

impl DispatchTableBuilder {
    pub fn handler(mut self, kind: TaskKind, handler: Handler) -> Self {
        self.handlers.push((kind, handler));
        self
    }

    /// Check that every kind has exactly one handler
    pub fn build(self) -> Result<DispatchTable> {
        let mut handlers = HashMap::new();
        for (kind, handler) in self.handlers {
            if handlers.insert(kind, handler).is_some() {
                return Err(ProvisionError::DuplicateHandler(kind.to_string()));
            }
        }
        if let Some(kind) = TaskKind::ALL.iter().find(|kind| !handlers.contains_key(*kind)) {
            return Err(ProvisionError::MissingHandler(kind.to_string()));
        }
        Ok(DispatchTable { handlers })
    }
}

pub struct DispatchTable {
    handlers: HashMap<TaskKind, Handler>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// Table wired to the provisioner's operations
    pub fn standard() -> Result<Self> {
        Self::builder()
            .handler(TaskKind::Show, handle_show)
            .handler(TaskKind::Create, handle_create)
            .handler(TaskKind::Delete, handle_delete)
            .handler(TaskKind::Image, handle_image)
            .build()
    }

    /// Run the request's handler and fold the outcome into a response
    pub async fn dispatch(
        &self,
        provisioner: &Arc<Provisioner>,
        request: TaskRequest,
    ) -> TaskResponse {
        let kind = request.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            return TaskResponse::failed(ProvisionError::MissingHandler(kind.to_string()).to_string());
        };

        match handler(provisioner.clone(), request).await {
            Ok(content) => TaskResponse::ok(content),
            Err(e) => {
                warn!(task = %kind, kind = %e.kind(), error = %e, "Task failed");
                TaskResponse::failed(e.to_string())
            }
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(TaskKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("DispatchTable").field("kinds", &kinds).finish()
    }
}

fn handle_show(provisioner: Arc<Provisioner>, request: TaskRequest) -> BoxFuture<'static, Result<Value>> {
    async move {
        let username = match request {
            TaskRequest::Show { username } => username,
            other => return Err(other.mismatch(TaskKind::Show)),
        };
        Ok(serde_json::to_value(provisioner.show(&username).await?)?)
    }
    .boxed()
}

fn handle_create(provisioner: Arc<Provisioner>, request: TaskRequest) -> BoxFuture<'static, Result<Value>> {
    async move {
        let create = match request {
            TaskRequest::Create(create) => create,
            other => return Err(other.mismatch(TaskKind::Create)),
        };
        Ok(serde_json::to_value(provisioner.create(&create).await?)?)
    }
    .boxed()
}

fn handle_delete(provisioner: Arc<Provisioner>, request: TaskRequest) -> BoxFuture<'static, Result<Value>> {
    async move {
        let (username, machine_name) = match request {
            TaskRequest::Delete {
                username,
                machine_name,
            } => (username, machine_name),
            other => return Err(other.mismatch(TaskKind::Delete)),
        };
        Ok(serde_json::to_value(provisioner.delete(&username, &machine_name).await?)?)
    }
    .boxed()
}

fn handle_image(provisioner: Arc<Provisioner>, request: TaskRequest) -> BoxFuture<'static, Result<Value>> {
    async move {
        if request.kind() != TaskKind::Image {
            return Err(request.mismatch(TaskKind::Image));
        }
        let versions = provisioner.images().await?;
        Ok(json!({ "image": versions }))
    }
    .boxed()
}
