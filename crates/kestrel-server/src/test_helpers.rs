//! Test helpers for kestrel-server route tests

use crate::{app, AppState, StaticTokenVerifier};
use kestrel_common::KestrelConfig;
use kestrel_hypervisor::MemoryHypervisor;
use kestrel_workflow::{DispatchTable, Provisioner, TaskQueue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const TEST_TOKEN: &str = "test-token";

/// AppState over an in-memory hypervisor with one image, `1.0.0`, in
/// `images_dir` and a token for `alice`
pub fn create_test_app_state(images_dir: &Path) -> (AppState, Arc<MemoryHypervisor>) {
    std::fs::write(images_dir.join("appliance-1.0.0.ova"), b"ova").unwrap();

    let mut config = KestrelConfig::default();
    config.appliance.images_dir = images_dir.to_path_buf();
    config.server.base_url = "https://kestrel.test".to_string();
    let config = Arc::new(config);

    let hv = Arc::new(MemoryHypervisor::new().with_network("alice_lan1"));
    let provisioner = Arc::new(Provisioner::new(hv.clone(), hv.clone(), config.clone()));
    let queue = TaskQueue::spawn(
        provisioner,
        DispatchTable::standard().unwrap(),
        &config.worker,
        config.appliance.resource.clone(),
    );
    let verifier = StaticTokenVerifier::new(HashMap::from([(
        TEST_TOKEN.to_string(),
        "alice".to_string(),
    )]));

    (
        AppState::new(config, Arc::new(queue), Arc::new(verifier)),
        hv,
    )
}

pub fn create_test_app(images_dir: &Path) -> (axum::Router, Arc<MemoryHypervisor>) {
    let (state, hv) = create_test_app_state(images_dir);
    (app(state), hv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    /// Poll the status endpoint until the task is done
    async fn wait_for_task(app: &axum::Router, task_id: &str) -> Value {
        for _ in 0..1000 {
            let response = app
                .clone()
                .oneshot(request(
                    "GET",
                    &format!("/api/2/inf/appliance/task/{}", task_id),
                    None,
                ))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                return json_body(response).await;
            }
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task {} never finished", task_id);
    }

    #[tokio::test]
    async fn test_images_is_enqueued_with_link() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .clone()
            .oneshot(request("GET", "/api/2/inf/appliance/image", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let link = response
            .headers()
            .get(header::LINK)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let json = json_body(response).await;
        assert_eq!(json["user"], "alice");
        let task_id = json["content"]["task-id"].as_str().unwrap().to_string();
        assert_eq!(
            link,
            format!(
                "<https://kestrel.test/api/2/inf/appliance/task/{}>; rel=status",
                task_id
            )
        );

        let result = wait_for_task(&app, &task_id).await;
        assert_eq!(result["content"], json!({"image": ["1.0.0"]}));
        assert_eq!(result["error"], Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_then_show() {
        let dir = tempfile::tempdir().unwrap();
        let (app, hv) = create_test_app(dir.path());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/2/inf/appliance",
                Some(json!({
                    "name": "box1",
                    "image": "1.0.0",
                    "network": "lan1",
                    "static-ip": "192.168.1.20"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let task_id = json_body(response).await["content"]["task-id"]
            .as_str()
            .unwrap()
            .to_string();

        let result = wait_for_task(&app, &task_id).await;
        assert_eq!(result["error"], Value::Null);
        assert_eq!(result["content"]["box1"]["meta"]["configured"], json!(false));
        assert!(hv.find("alice", "box1").is_some());

        let response = app
            .clone()
            .oneshot(request("GET", "/api/2/inf/appliance", None))
            .await
            .unwrap();
        let task_id = json_body(response).await["content"]["task-id"]
            .as_str()
            .unwrap()
            .to_string();
        let result = wait_for_task(&app, &task_id).await;
        assert_eq!(
            result["content"]
                .as_object()
                .unwrap()
                .keys()
                .collect::<Vec<_>>(),
            vec!["box1"]
        );
    }

    #[tokio::test]
    async fn test_create_on_unknown_network_fails_in_task() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/2/inf/appliance",
                Some(json!({
                    "name": "box1",
                    "image": "1.0.0",
                    "network": "lan2",
                    "static-ip": "192.168.1.20"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let task_id = json_body(response).await["content"]["task-id"]
            .as_str()
            .unwrap()
            .to_string();

        let result = wait_for_task(&app, &task_id).await;
        assert_eq!(result["error"], "No network named alice_lan2 found");
    }

    #[tokio::test]
    async fn test_create_validation_error_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .oneshot(request(
                "POST",
                "/api/2/inf/appliance",
                Some(json!({
                    "name": "box1",
                    "image": "1.0.0",
                    "network": "lan1",
                    "static-ip": "10.1.1.1"
                })),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("not within the network"));
    }

    #[tokio::test]
    async fn test_create_with_unsafe_name_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (app, hv) = create_test_app(dir.path());

        let response = app
            .oneshot(request(
                "POST",
                "/api/2/inf/appliance",
                Some(json!({
                    "name": "box1;$(rm -rf /)",
                    "image": "1.0.0",
                    "network": "lan1",
                    "static-ip": "192.168.1.20"
                })),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("Invalid instance name"));
        assert!(hv.commands().is_empty());
    }

    #[tokio::test]
    async fn test_create_missing_field_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .oneshot(request(
                "POST",
                "/api/2/inf/appliance",
                Some(json!({"name": "box1"})),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_delete_unknown_instance_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                "/api/2/inf/appliance",
                Some(json!({"name": "box9"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let task_id = json_body(response).await["content"]["task-id"]
            .as_str()
            .unwrap()
            .to_string();

        let result = wait_for_task(&app, &task_id).await;
        assert_eq!(result["error"], "No Appliance named box9 found");
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/2/inf/appliance")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_token_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/2/inf/appliance")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        let response = app
            .oneshot(request("GET", "/api/2/inf/jumpbox", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_v1_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        for method in ["GET", "POST", "DELETE"] {
            let response = app
                .clone()
                .oneshot(request(method, "/api/1/inf/appliance", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", method);
        }
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = create_test_app(dir.path());

        for id in [uuid::Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let response = app
                .clone()
                .oneshot(request(
                    "GET",
                    &format!("/api/2/inf/appliance/task/{}", id),
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }
}
