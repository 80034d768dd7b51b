//! Task catalog

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::{authorize, RequestContext, ADMINS};
use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{ImpactError, NewTask, Result, Task, TaskUpdate};

const MAX_TITLE_LEN: usize = 120;

/// Largest reward a single ledger entry can carry
pub const MAX_TASK_SCORE: u64 = i64::MAX as u64;

fn check_score(score: u64) -> Result<u64> {
    if score > MAX_TASK_SCORE {
        return Err(ImpactError::Validation(format!(
            "Task score must be at most {MAX_TASK_SCORE}"
        )));
    }
    Ok(score)
}

fn clean_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ImpactError::Validation("Task title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ImpactError::Validation(format!(
            "Task title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

fn clean_id(id: Option<&str>) -> Result<String> {
    match id.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Uuid::new_v4().to_string()),
        Some(id) if id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') => {
            Ok(id.to_string())
        }
        Some(_) => Err(ImpactError::Validation(
            "Task id may only contain letters, digits, '-' and '_'".into(),
        )),
    }
}

pub struct TaskCatalog {
    store: Arc<dyn ImpactStore>,
    retry: RetryPolicy,
}

impl TaskCatalog {
    pub fn new(store: Arc<dyn ImpactStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn list(&self) -> Result<Vec<Task>> {
        self.retry.run("list_tasks", |_| self.store.list_tasks()).await
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        self.retry
            .run("get_task", |_| self.store.get_task(id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("Task".into()))
    }

    /// Admin only
    pub async fn create(&self, ctx: &RequestContext, request: NewTask) -> Result<Task> {
        authorize(&ctx.principal, ADMINS)?;

        let task = Task {
            id: clean_id(request.id.as_deref())?,
            title: clean_title(&request.title)?,
            description: request.description.trim().to_string(),
            category: request.category.trim().to_string(),
            difficulty: request.difficulty,
            score: check_score(request.score)?,
            created_at: Utc::now(),
        };

        let created = self
            .retry
            .run("insert_task", |_| self.store.insert_task(task.clone()))
            .await;
        let created = match created {
            // A retried insert that already landed
            Err(ImpactError::Conflict(msg)) => match self.store.get_task(&task.id).await? {
                Some(stored) if stored.title == task.title && stored.score == task.score => stored,
                _ => return Err(ImpactError::Conflict(msg)),
            },
            other => other?,
        };

        info!(admin = %ctx.principal.id, task = %created.id, score = created.score, "Task created");
        Ok(created)
    }

    /// Admin only. The score is frozen once any submission references the task.
    pub async fn update(&self, ctx: &RequestContext, id: &str, update: TaskUpdate) -> Result<Task> {
        authorize(&ctx.principal, ADMINS)?;

        let update = TaskUpdate {
            title: update.title.as_deref().map(clean_title).transpose()?,
            description: update.description.map(|d| d.trim().to_string()),
            category: update.category.map(|c| c.trim().to_string()),
            score: update.score.map(check_score).transpose()?,
            ..update
        };

        let updated = self
            .retry
            .run("update_task", |_| self.store.update_task(id, &update))
            .await?;

        info!(admin = %ctx.principal.id, task = id, "Task updated");
        Ok(updated)
    }

    /// Admin only. A task that any submission references cannot be deleted.
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        authorize(&ctx.principal, ADMINS)?;

        self.retry
            .run("delete_task", |attempt| async move {
                match self.store.delete_task(id).await {
                    // A retried delete that already landed
                    Err(ImpactError::NotFound(_)) if attempt > 1 => Ok(()),
                    other => other,
                }
            })
            .await?;

        info!(admin = %ctx.principal.id, task = id, "Task deleted");
        Ok(())
    }
}
