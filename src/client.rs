//! HTTP client for a running `kestrel serve`
//!
//! Every command is submitted as a task, then the task's status endpoint is
//! polled until the response is ready.

use color_eyre::eyre::{eyre, Result, WrapErr};
use kestrel_common::TaskResponse;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ApiClient {
    client: Client,
    base: String,
    resource: String,
    token: String,
    wait: Duration,
}

impl ApiClient {
    pub fn new(server: &str, resource: &str, token: &str, wait: Duration) -> Result<Self> {
        let client = Client::builder()
            .build()
            .wrap_err("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base: server.trim_end_matches('/').to_string(),
            resource: resource.to_string(),
            token: token.to_string(),
            wait,
        })
    }

    /// Submit a request under `/api/2/inf/<resource><path>` and wait for it
    pub async fn run<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<TaskResponse> {
        let task_id = self.submit(method, path, body).await?;
        info!(task_id = %task_id, "Task accepted, waiting for it to finish");
        self.wait_for(&task_id).await
    }

    async fn submit<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String> {
        let url = format!("{}/api/2/inf/{}{}", self.base, self.resource, path);
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .wrap_err_with(|| format!("Failed to reach {}", self.base))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status != StatusCode::ACCEPTED {
            return Err(eyre!("Request rejected ({}): {}", status, error_message(&body)));
        }

        body["content"]["task-id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| eyre!("Response carried no task id: {}", body))
    }

    async fn wait_for(&self, task_id: &str) -> Result<TaskResponse> {
        let url = format!("{}/api/2/inf/{}/task/{}", self.base, self.resource, task_id);
        let deadline = Instant::now() + self.wait;

        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await
                .wrap_err("Failed to poll task status")?;

            match response.status() {
                StatusCode::OK => {
                    return response
                        .json::<TaskResponse>()
                        .await
                        .wrap_err("Malformed task response");
                }
                StatusCode::ACCEPTED => debug!(task_id, "Task still running"),
                status => {
                    let body: Value = response.json().await.unwrap_or(Value::Null);
                    return Err(eyre!(
                        "Polling task {} failed ({}): {}",
                        task_id,
                        status,
                        error_message(&body)
                    ));
                }
            }

            if Instant::now() >= deadline {
                return Err(eyre!("Task {} did not finish within {:?}", task_id, self.wait));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn error_message(body: &Value) -> String {
    match body["error"].as_str() {
        Some(message) => message.to_string(),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(&json!({"error": "No network named alice_lan2 found"})),
            "No network named alice_lan2 found"
        );
        assert_eq!(error_message(&Value::Null), "null");
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client =
            ApiClient::new("http://127.0.0.1:5000/", "appliance", "t", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base, "http://127.0.0.1:5000");
    }
}
