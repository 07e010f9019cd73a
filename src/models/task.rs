use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::Identity;

/// A to-do item. Ownership and `username` are fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub owner: String,
    /// Display name of the owner when the task was created; never re-synced.
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
}

impl Task {
    pub fn new(text: impl Into<String>, owner: &Identity) -> Self {
        Task {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            // Stores keep millisecond precision.
            created_at: Utc::now().trunc_subsecs(3),
            owner: owner.id.clone(),
            username: owner.display_name.clone(),
            checked: None,
            private: None,
        }
    }

    // Absent flags count as false.
    pub fn is_checked(&self) -> bool {
        self.checked == Some(true)
    }

    pub fn is_private(&self) -> bool {
        self.private == Some(true)
    }

    pub fn is_owned_by(&self, user_id: Option<&str>) -> bool {
        user_id.is_some_and(|id| id == self.owner)
    }

    /// Apply a partial update in place, returning whether anything changed.
    pub fn apply(&mut self, patch: &TaskPatch) -> bool {
        let before = (self.checked, self.private);
        if let Some(checked) = patch.checked {
            self.checked = Some(checked);
        }
        if let Some(private) = patch.private {
            self.private = Some(private);
        }
        before != (self.checked, self.private)
    }
}

/// The mutable subset of a task, applied with `$set` semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub checked: Option<bool>,
    pub private: Option<bool>,
}

impl TaskPatch {
    pub fn checked(value: bool) -> Self {
        TaskPatch { checked: Some(value), ..Default::default() }
    }

    pub fn private(value: bool) -> Self {
        TaskPatch { private: Some(value), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.checked.is_none() && self.private.is_none()
    }
}

/// A write that reached the store, carrying the stored snapshot after it.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    Upserted(Task),
    Removed(String),
}

impl TaskChange {
    pub fn task_id(&self) -> &str {
        match self {
            TaskChange::Upserted(task) => &task.id,
            TaskChange::Removed(id) => id,
        }
    }
}
