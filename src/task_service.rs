use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{broadcast, Mutex};

use crate::error::TaskError;
use crate::models::user::user_id_of;
use crate::models::{Identity, Task, TaskChange, TaskPatch};
use crate::rules;
use crate::store::TaskStore;
use crate::visibility::TaskFilter;

/// The task mutation API. Every call takes the acting identity explicitly and
/// checks the rules against the snapshot read right before the write.
///
/// Writes and their change events go out under one lock, so subscribers see
/// changes in the order the store committed them.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    changes: broadcast::Sender<TaskChange>,
    commit: Mutex<()>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        TaskService {
            store,
            changes,
            commit: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: TaskChange) {
        // No receivers is fine: nobody is watching.
        let _ = self.changes.send(change);
    }

    async fn load(&self, task_id: &str) -> Result<Task, TaskError> {
        self.store
            .find_one(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub async fn add_task(&self, text: &str, acting: Option<&Identity>) -> Result<String, TaskError> {
        let owner = acting.ok_or(TaskError::Unauthenticated)?;
        let task = Task::new(text, owner);
        let _commit = self.commit.lock().await;
        let id = self.store.insert(&task).await?;
        info!("Task {} created by {}", id, owner.id);
        self.publish(TaskChange::Upserted(task));
        Ok(id)
    }

    pub async fn delete_task(&self, task_id: &str, acting: Option<&Identity>) -> Result<(), TaskError> {
        let task = self.load(task_id).await?;
        if !rules::can_delete(&task, user_id_of(acting)) {
            return Err(TaskError::NotAuthorized(task_id.to_string()));
        }
        let _commit = self.commit.lock().await;
        if !self.store.remove(task_id).await? {
            return Err(TaskError::NotFound(task_id.to_string()));
        }
        info!("Task {} deleted", task_id);
        self.publish(TaskChange::Removed(task_id.to_string()));
        Ok(())
    }

    pub async fn set_checked(
        &self,
        task_id: &str,
        checked: bool,
        acting: Option<&Identity>,
    ) -> Result<(), TaskError> {
        let task = self.load(task_id).await?;
        if !rules::can_mutate_checked(&task, user_id_of(acting)) {
            return Err(TaskError::NotAuthorized(task_id.to_string()));
        }
        self.write(task, TaskPatch::checked(checked)).await
    }

    pub async fn set_private(
        &self,
        task_id: &str,
        private: bool,
        acting: Option<&Identity>,
    ) -> Result<(), TaskError> {
        let task = self.load(task_id).await?;
        if !rules::can_set_private(&task, user_id_of(acting)) {
            return Err(TaskError::NotAuthorized(task_id.to_string()));
        }
        self.write(task, TaskPatch::private(private)).await
    }

    async fn write(&self, before: Task, patch: TaskPatch) -> Result<(), TaskError> {
        let _commit = self.commit.lock().await;
        let after = self
            .store
            .update(&before.id, &patch)
            .await?
            .ok_or_else(|| TaskError::NotFound(before.id.clone()))?;
        if after == before {
            debug!("Task {} unchanged by {:?}", after.id, patch);
        } else {
            debug!("Task {} updated: {:?}", after.id, patch);
            self.publish(TaskChange::Upserted(after));
        }
        Ok(())
    }

    /// Tasks the identity may see, newest first.
    pub async fn list_visible(
        &self,
        acting: Option<&Identity>,
        hide_completed: bool,
    ) -> Result<Vec<Task>, TaskError> {
        let mut filter = TaskFilter::visible_to(user_id_of(acting));
        if hide_completed {
            filter = filter.and(TaskFilter::Incomplete);
        }
        Ok(self.store.find(&filter).await?)
    }

    pub async fn incomplete_count(&self, acting: Option<&Identity>) -> Result<u64, TaskError> {
        let filter = TaskFilter::visible_to(user_id_of(acting)).and(TaskFilter::Incomplete);
        Ok(self.store.count(&filter).await?)
    }
}
