use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::{AuthenticatedPrincipal, Role};
use crate::error::HephaestusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub progress: f32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub principal: Option<String>,
    #[serde(skip)]
    pub required_roles: Vec<Role>,
}

impl Task {
    fn can_be_observed_by(&self, requester: Option<&AuthenticatedPrincipal>) -> bool {
        match requester {
            None => self.principal.is_none() && self.required_roles.is_empty(),
            Some(p) => {
                Some(p.principal.as_str()) == self.principal.as_deref()
                    || (self.required_roles.is_empty())
                    || p.has_any_role(&self.required_roles)
            }
        }
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Handle passed into a task's work closure, the Rust analogue of a
/// cancellation-token-plus-progress-sink execution context.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    cancel: CancellationToken,
    progress_tx: broadcast::Sender<Value>,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn emit(&self, event: Value) {
        let _ = self.progress_tx.send(event);
    }
}

struct TaskEntry {
    task: RwLock<Task>,
    cancel: CancellationToken,
    progress_tx: broadcast::Sender<Value>,
}

/// Bounded registry of asynchronous, cancellable, pollable/streamable tasks.
pub struct TaskManager {
    tasks: std::sync::Arc<DashMap<Uuid, TaskEntry>>,
    max_concurrent: usize,
    retention: Duration,
    default_timeout: Duration,
}

impl TaskManager {
    pub fn new(max_concurrent: usize, retention: Duration, default_timeout: Duration) -> Self {
        Self {
            tasks: std::sync::Arc::new(DashMap::new()),
            max_concurrent,
            retention,
            default_timeout,
        }
    }

    pub fn create_task<F>(
        &self,
        name: &str,
        principal: Option<&AuthenticatedPrincipal>,
        required_roles: Vec<Role>,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<Uuid, HephaestusError>
    where
        F: FnOnce(TaskContext) -> BoxFuture<Result<Value, String>> + Send + 'static,
    {
        if name.trim().is_empty() {
            return Err(HephaestusError::Validation("task name must not be empty".into()));
        }

        self.cleanup_completed(self.retention);
        if self.tasks.len() >= self.max_concurrent {
            return Err(HephaestusError::Execution(
                "task registry is at capacity".into(),
            ));
        }

        let id = Uuid::new_v4();
        let (progress_tx, _) = broadcast::channel(64);
        let cancel = CancellationToken::new();
        let task = Task {
            id,
            name: name.to_string(),
            status: TaskStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            principal: principal.map(|p| p.principal.clone()),
            required_roles,
        };
        self.tasks.insert(
            id,
            TaskEntry {
                task: RwLock::new(task),
                cancel: cancel.clone(),
                progress_tx: progress_tx.clone(),
            },
        );

        let ctx = TaskContext {
            task_id: id,
            cancel: cancel.clone(),
            progress_tx: progress_tx.clone(),
        };
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.mark_running(id);

        let tasks = self.tasks_handle_for_completion();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = work(ctx) => result,
                _ = tokio::time::sleep(timeout) => Err("Task timed out".to_string()),
                _ = cancel.cancelled() => Err("Task cancelled".to_string()),
            };
            tasks.complete(id, outcome);
        });

        Ok(id)
    }

    fn mark_running(&self, id: Uuid) {
        if let Some(entry) = self.tasks.get(&id) {
            let mut task = entry.task.write().expect("task lock poisoned");
            task.status = TaskStatus::Running;
        }
    }

    fn tasks_handle_for_completion(&self) -> CompletionHandle {
        CompletionHandle {
            tasks: self.tasks.clone(),
        }
    }

    pub fn get_status(
        &self,
        id: Uuid,
        requester: Option<&AuthenticatedPrincipal>,
    ) -> Result<Task, HephaestusError> {
        let entry = self
            .tasks
            .get(&id)
            .ok_or_else(|| HephaestusError::NotFound(format!("task '{id}' not found")))?;
        let task = entry.task.read().expect("task lock poisoned").clone();
        if !task.can_be_observed_by(requester) {
            return Err(HephaestusError::Authorization {
                principal: requester.map(|p| p.principal.clone()).unwrap_or_default(),
                role: "task-owner".into(),
            });
        }
        Ok(task)
    }

    pub fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<Value>, HephaestusError> {
        let entry = self
            .tasks
            .get(&id)
            .ok_or_else(|| HephaestusError::NotFound(format!("task '{id}' not found")))?;
        Ok(entry.progress_tx.subscribe())
    }

    pub fn cancel(&self, id: Uuid) -> Result<(), HephaestusError> {
        let entry = self
            .tasks
            .get(&id)
            .ok_or_else(|| HephaestusError::NotFound(format!("task '{id}' not found")))?;
        entry.cancel.cancel();
        Ok(())
    }

    pub fn cleanup_completed(&self, max_age: Duration) {
        let now = Utc::now();
        self.tasks.retain(|_, entry| {
            let task = entry.task.read().expect("task lock poisoned");
            match (task.status, task.completed_at) {
                (TaskStatus::Completed | TaskStatus::Failed, Some(completed_at)) => {
                    let age = now.signed_duration_since(completed_at);
                    age.to_std().map(|a| a < max_age).unwrap_or(true)
                }
                _ => true,
            }
        });
    }
}

struct CompletionHandle {
    tasks: std::sync::Arc<DashMap<Uuid, TaskEntry>>,
}

impl CompletionHandle {
    fn complete(&self, id: Uuid, outcome: Result<Value, String>) {
        if let Some(entry) = self.tasks.get(&id) {
            let mut task = entry.task.write().expect("task lock poisoned");
            task.completed_at = Some(Utc::now());
            match outcome {
                Ok(result) => {
                    task.status = TaskStatus::Completed;
                    task.progress = 1.0;
                    task.result = Some(result);
                }
                Err(error) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error);
                }
            }
            let snapshot = serde_json::json!({
                "status": task.status,
                "progress": task.progress,
                "error": task.error,
            });
            drop(task);
            entry.progress_tx.send(snapshot).ok();
        }
    }
}
