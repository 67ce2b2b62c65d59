use crate::auth::AuthUser;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::LINK;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use kestrel_common::network::{validate_hostname, DEFAULT_GATEWAY, DEFAULT_NETMASK};
use kestrel_common::NetworkConfig;
use kestrel_workflow::{CreateRequest, TaskKind, TaskRequest, TaskState};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/2/inf/{resource}",
            get(show_instances)
                .post(create_instance)
                .delete(delete_instance),
        )
        .route("/api/2/inf/{resource}/image", get(list_images))
        .route("/api/2/inf/{resource}/task/{id}", get(task_status))
        // Retired API version
        .route(
            "/api/1/inf/{resource}",
            get(api_v1_gone).post(api_v1_gone).delete(api_v1_gone),
        )
}

/// `{"error": message}` with the given status
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateBody {
    pub name: String,
    pub image: String,
    pub network: String,
    pub static_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<String>>,
}

impl CreateBody {
    /// Validate the body and scope it to `user`
    pub fn into_request(self, user: &str) -> kestrel_common::Result<CreateRequest> {
        validate_hostname(&self.name)?;
        let dns = self
            .dns
            .unwrap_or_else(|| vec![DEFAULT_GATEWAY.to_string()]);
        let network_config = NetworkConfig::parse(
            &self.static_ip,
            self.default_gateway.as_deref().unwrap_or(DEFAULT_GATEWAY),
            self.netmask.as_deref().unwrap_or(DEFAULT_NETMASK),
            &dns,
        )?;

        Ok(CreateRequest {
            owner: user.to_string(),
            name: self.name,
            image: self.image,
            network: format!("{}_{}", user, self.network),
            network_config,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteBody {
    pub name: String,
}

/// Header carrying the caller's transaction id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller-supplied transaction id, or a fresh one
pub fn txn_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn check_resource(state: &AppState, resource: &str) -> Result<(), Response> {
    if resource == state.config.appliance.resource {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Unknown resource {}", resource),
        ))
    }
}

/// Submit a task and answer `202` with a `Link` to its status
async fn enqueue(
    state: &AppState,
    headers: &HeaderMap,
    resource: &str,
    user: &str,
    request: TaskRequest,
) -> Response {
    let kind = request.kind();
    let txn_id = txn_id(headers);

    match state.queue.submit(request, txn_id.clone()).await {
        Ok(id) => {
            info!(task = %kind.task_name(resource), task_id = %id, txn_id = %txn_id, user, "Task accepted");
            let link = format!(
                "<{}/api/2/inf/{}/task/{}>; rel=status",
                state.config.server.base_url.trim_end_matches('/'),
                resource,
                id
            );
            (
                StatusCode::ACCEPTED,
                [(LINK, link)],
                Json(json!({ "user": user, "content": { "task-id": id } })),
            )
                .into_response()
        }
        Err(e) => {
            error!(task = %kind.task_name(resource), error = %e, "Failed to enqueue task");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn show_instances(
    Path(resource): Path<String>,
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_resource(&state, &resource) {
        return response;
    }
    let request = TaskRequest::Show {
        username: user.clone(),
    };
    enqueue(&state, &headers, &resource, &user, request).await
}

async fn create_instance(
    Path(resource): Path<String>,
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    body: Result<Json<CreateBody>, JsonRejection>,
) -> Response {
    if let Err(response) = check_resource(&state, &resource) {
        return response;
    }
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match body.into_request(&user) {
        Ok(request) => {
            enqueue(&state, &headers, &resource, &user, TaskRequest::Create(request)).await
        }
        Err(e) => {
            warn!(user, error = %e, "Rejected create request");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

async fn delete_instance(
    Path(resource): Path<String>,
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    body: Result<Json<DeleteBody>, JsonRejection>,
) -> Response {
    if let Err(response) = check_resource(&state, &resource) {
        return response;
    }
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let request = TaskRequest::Delete {
        username: user.clone(),
        machine_name: body.name,
    };
    enqueue(&state, &headers, &resource, &user, request).await
}

async fn list_images(
    Path(resource): Path<String>,
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_resource(&state, &resource) {
        return response;
    }
    enqueue(&state, &headers, &resource, &user, TaskRequest::Image).await
}

async fn task_status(
    Path((resource, id)): Path<(String, String)>,
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> Response {
    if let Err(response) = check_resource(&state, &resource) {
        return response;
    }
    let Ok(id) = id.parse::<Uuid>() else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown task {}", id));
    };

    match state.queue.status(id).await {
        Some(TaskState::Done(response)) => (StatusCode::OK, Json(response)).into_response(),
        Some(TaskState::Pending) => (StatusCode::ACCEPTED, Json(json!({ "status": "pending" }))).into_response(),
        Some(TaskState::Running) => (StatusCode::ACCEPTED, Json(json!({ "status": "running" }))).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Unknown task {}", id)),
    }
}

async fn api_v1_gone() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// Task kinds the HTTP surface can enqueue, for the start-up log
pub fn routed_tasks(resource: &str) -> Vec<String> {
    TaskKind::ALL
        .iter()
        .map(|kind| kind.task_name(resource))
        .collect()
}
