//! In-process task queue
//!
//! Tasks are fed through a bounded channel to a fixed pool of workers. The
//! only state the workers share is the status table that callers poll.
//! Finished tasks stay in that table for the configured retention and are
//! swept out on the next write after it lapses.

use crate::error::{ProvisionError, Result};
use crate::orchestrator::Provisioner;
use crate::task::{DispatchTable, TaskRequest};
use kestrel_common::config::WorkerConfig;
use kestrel_common::TaskResponse;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "response", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Done(TaskResponse),
}

struct Job {
    id: Uuid,
    txn_id: String,
    request: TaskRequest,
}

struct StatusEntry {
    state: TaskState,
    finished: Option<Instant>,
}

impl StatusEntry {
    /// Only finished tasks expire
    fn expired(&self, retention: Duration, now: Instant) -> bool {
        self.finished
            .is_some_and(|finished| now.duration_since(finished) >= retention)
    }
}

/// Task id to state, forgetting finished tasks after `retention`
struct StatusTable {
    entries: HashMap<Uuid, StatusEntry>,
    retention: Duration,
}

impl StatusTable {
    fn new(retention: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            retention,
        }
    }

    fn get(&self, id: &Uuid) -> Option<TaskState> {
        let entry = self.entries.get(id)?;
        if entry.expired(self.retention, Instant::now()) {
            return None;
        }
        Some(entry.state.clone())
    }

    fn set(&mut self, id: Uuid, state: TaskState) {
        let now = Instant::now();
        let finished = matches!(state, TaskState::Done(_)).then_some(now);
        self.evict_expired(now);
        self.entries.insert(id, StatusEntry { state, finished });
    }

    fn remove(&mut self, id: &Uuid) {
        self.entries.remove(id);
    }

    fn evict_expired(&mut self, now: Instant) {
        let before = self.entries.len();
        let retention = self.retention;
        self.entries.retain(|_, entry| !entry.expired(retention, now));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted expired task results");
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

type SharedStatuses = Arc<RwLock<StatusTable>>;

pub struct TaskQueue {
    resource: String,
    sender: mpsc::Sender<Job>,
    statuses: SharedStatuses,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    /// Start `config.concurrency` workers serving `resource` tasks
    pub fn spawn(
        provisioner: Arc<Provisioner>,
        table: DispatchTable,
        config: &WorkerConfig,
        resource: impl Into<String>,
    ) -> Self {
        let resource = resource.into();
        let (sender, receiver) = mpsc::channel(config.queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let statuses = Arc::new(RwLock::new(StatusTable::new(config.result_retention())));
        let table = Arc::new(table);

        let workers = (0..config.concurrency.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    resource.clone(),
                    provisioner.clone(),
                    table.clone(),
                    receiver.clone(),
                    statuses.clone(),
                ))
            })
            .collect();

        info!(resource = %resource, workers = config.concurrency.max(1), "Task queue started");

        Self {
            resource,
            sender,
            statuses,
            workers,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Enqueue a task; waits while the queue is full
    pub async fn submit(&self, request: TaskRequest, txn_id: impl Into<String>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let txn_id = txn_id.into();
        debug!(task = %request.kind().task_name(&self.resource), task_id = %id, txn_id = %txn_id, "Submitting task");

        self.statuses.write().await.set(id, TaskState::Pending);
        if self.sender.send(Job { id, txn_id, request }).await.is_err() {
            self.statuses.write().await.remove(&id);
            return Err(ProvisionError::QueueClosed);
        }
        Ok(id)
    }

    /// Current state, `None` for unknown or expired tasks
    pub async fn status(&self, id: Uuid) -> Option<TaskState> {
        self.statuses.read().await.get(&id)
    }

    /// Number of tasks the status table currently holds
    pub async fn tracked(&self) -> usize {
        self.statuses.read().await.len()
    }

    /// Stop accepting tasks and wait for the workers to drain the queue
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!(resource = %self.resource, "Task queue stopped");
    }
}

async fn run_worker(
    worker: usize,
    resource: String,
    provisioner: Arc<Provisioner>,
    table: Arc<DispatchTable>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    statuses: SharedStatuses,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(Job { id, txn_id, request }) = job else {
            break;
        };

        let task = request.kind().task_name(&resource);
        let span = info_span!("task", task = %task, task_id = %id, txn_id = %txn_id);

        async {
            statuses.write().await.set(id, TaskState::Running);
            info!(worker, "Task started");

            let response = table.dispatch(&provisioner, request).await;
            info!(success = response.is_success(), "Task finished");

            statuses.write().await.set(id, TaskState::Done(response));
        }
        .instrument(span)
        .await;
    }
    debug!(worker, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::KestrelConfig;
    use kestrel_hypervisor::MemoryHypervisor;
    use serde_json::json;
    use std::time::Duration;

    fn queue(images_dir: &std::path::Path) -> TaskQueue {
        queue_with(images_dir, KestrelConfig::default())
    }

    fn queue_with(images_dir: &std::path::Path, mut config: KestrelConfig) -> TaskQueue {
        config.appliance.images_dir = images_dir.to_path_buf();
        let hv = Arc::new(MemoryHypervisor::new());
        let provisioner = Arc::new(Provisioner::new(hv.clone(), hv, Arc::new(config.clone())));
        TaskQueue::spawn(
            provisioner,
            DispatchTable::standard().unwrap(),
            &config.worker,
            "appliance",
        )
    }

    async fn wait_done(queue: &TaskQueue, id: Uuid) -> TaskResponse {
        for _ in 0..500 {
            if let Some(TaskState::Done(response)) = queue.status(id).await {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", id);
    }

    #[tokio::test]
    async fn test_submit_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("appliance-1.0.0.ova"), b"ova").unwrap();
        let queue = queue(dir.path());

        let id = queue.submit(TaskRequest::Image, "txn-1").await.unwrap();
        let response = wait_done(&queue, id).await;

        assert_eq!(response.content, json!({"image": ["1.0.0"]}));
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn test_failed_task_is_done_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(dir.path());

        let id = queue
            .submit(
                TaskRequest::Show {
                    username: "nobody".to_string(),
                },
                "txn-2",
            )
            .await
            .unwrap();
        let response = wait_done(&queue, id).await;
        assert_eq!(response.content, json!({}));
        assert!(response.is_success());

        let id = queue
            .submit(
                TaskRequest::Delete {
                    username: "nobody".to_string(),
                    machine_name: "box1".to_string(),
                },
                "txn-3",
            )
            .await
            .unwrap();
        let response = wait_done(&queue, id).await;
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_unknown_task_has_no_status() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(dir.path());
        assert_eq!(queue.status(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(dir.path());
        let statuses = queue.statuses.clone();

        let mut ids = Vec::new();
        for n in 0..8 {
            ids.push(queue.submit(TaskRequest::Image, format!("txn-{}", n)).await.unwrap());
        }
        queue.shutdown().await;

        let statuses = statuses.read().await;
        for id in ids {
            assert!(matches!(statuses.get(&id), Some(TaskState::Done(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_tasks_expire_after_retention() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("appliance-1.0.0.ova"), b"ova").unwrap();
        let mut config = KestrelConfig::default();
        config.worker.result_retention_secs = 60;
        let queue = queue_with(dir.path(), config);

        let first = queue.submit(TaskRequest::Image, "txn-1").await.unwrap();
        wait_done(&queue, first).await;
        assert_eq!(queue.tracked().await, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(queue.status(first).await, Some(TaskState::Done(_))));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(queue.status(first).await, None);

        let second = queue.submit(TaskRequest::Image, "txn-2").await.unwrap();
        wait_done(&queue, second).await;
        assert_eq!(queue.status(first).await, None);
        assert_eq!(queue.tracked().await, 1);
    }

    #[test]
    fn test_pending_and_running_entries_never_expire() {
        let mut table = StatusTable::new(Duration::ZERO);
        let running = Uuid::new_v4();
        table.set(running, TaskState::Running);
        table.set(Uuid::new_v4(), TaskState::Done(TaskResponse::ok(json!({}))));
        table.set(Uuid::new_v4(), TaskState::Pending);

        assert_eq!(table.get(&running), Some(TaskState::Running));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_value(TaskState::Running).unwrap(),
            json!({"status": "running"})
        );
    }
}
