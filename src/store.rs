//! Document store contracts for tasks and users, plus the in-memory backends
//! used by tests and by local runs without `MONGO_URI`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Task, TaskPatch, User};
use crate::visibility::TaskFilter;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task, returning its id.
    async fn insert(&self, task: &Task) -> Result<String, StoreError>;

    async fn find_one(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Matching tasks, newest first.
    async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// `$set` the patch fields and return the stored document afterwards,
    /// or `None` if no task has this id.
    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>, StoreError>;

    /// Returns whether a task was removed.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;

    async fn count(&self, filter: &TaskFilter) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `StoreError::Duplicate` if the username exists.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
}

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<String, StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id.clone()));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task.id.clone())
    }

    async fn find_one(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.write().await;
        Ok(tasks.get_mut(id).map(|task| {
            task.apply(patch);
            task.clone()
        }))
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| filter.matches(t)).count() as u64)
    }
}

/// An in-memory task store whose inserts commit, then stall before replying,
/// the way a remote round trip does.
#[cfg(test)]
pub struct SlowInsertStore {
    inner: MemoryTaskStore,
    delay: std::time::Duration,
}

#[cfg(test)]
impl SlowInsertStore {
    pub fn new(delay: std::time::Duration) -> Self {
        SlowInsertStore { inner: MemoryTaskStore::new(), delay }
    }
}

#[cfg(test)]
#[async_trait]
impl TaskStore for SlowInsertStore {
    async fn insert(&self, task: &Task) -> Result<String, StoreError> {
        let id = self.inner.insert(task).await?;
        tokio::time::sleep(self.delay).await;
        Ok(id)
    }

    async fn find_one(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.inner.find_one(id).await
    }

    async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.inner.find(filter).await
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
        self.inner.update(id, patch).await
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.remove(id).await
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64, StoreError> {
        self.inner.count(filter).await
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.username) {
            return Err(StoreError::Duplicate(user.username.clone()));
        }
        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(username).cloned())
    }
}
