use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{options::ClientOptions, Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{Task, TaskPatch, User};
use crate::store::{TaskStore, UserStore};
use crate::visibility::TaskFilter;

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoDB {
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        Ok(MongoDB { db: client.database(db_name) })
    }

    /// Newest-first listing and unique usernames.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.db
            .collection::<TaskDocument>("tasks")
            .create_index(IndexModel::builder().keys(doc! { "createdAt": -1 }).build())
            .await?;
        self.db
            .collection::<User>("users")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "username": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        info!("MongoDB indexes ensured on {}", self.db.name());
        Ok(())
    }

    pub fn task_store(&self) -> MongoTaskStore {
        MongoTaskStore { tasks: self.db.collection("tasks") }
    }

    pub fn user_store(&self) -> MongoUserStore {
        MongoUserStore { users: self.db.collection("users") }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

/// Stored form of a task: `_id` key and a native BSON date so the
/// `createdAt` sort is chronological.
#[derive(Debug, Serialize, Deserialize)]
struct TaskDocument {
    #[serde(rename = "_id")]
    id: String,
    text: String,
    #[serde(rename = "createdAt")]
    created_at: BsonDateTime,
    owner: String,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private: Option<bool>,
}

impl From<&Task> for TaskDocument {
    fn from(task: &Task) -> Self {
        TaskDocument {
            id: task.id.clone(),
            text: task.text.clone(),
            created_at: BsonDateTime::from_millis(task.created_at.timestamp_millis()),
            owner: task.owner.clone(),
            username: task.username.clone(),
            checked: task.checked,
            private: task.private,
        }
    }
}

impl TryFrom<TaskDocument> for Task {
    type Error = StoreError;

    fn try_from(doc: TaskDocument) -> Result<Self, Self::Error> {
        let created_at = DateTime::<Utc>::from_timestamp_millis(doc.created_at.timestamp_millis())
            .ok_or_else(|| StoreError::Corrupt {
                id: doc.id.clone(),
                reason: "createdAt out of range".to_string(),
            })?;
        Ok(Task {
            id: doc.id,
            text: doc.text,
            created_at,
            owner: doc.owner,
            username: doc.username,
            checked: doc.checked,
            private: doc.private,
        })
    }
}

fn set_document(patch: &TaskPatch) -> Document {
    let mut fields = doc! {};
    if let Some(checked) = patch.checked {
        fields.insert("checked", checked);
    }
    if let Some(private) = patch.private {
        fields.insert("private", private);
    }
    doc! { "$set": fields }
}

pub struct MongoTaskStore {
    tasks: Collection<TaskDocument>,
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn insert(&self, task: &Task) -> Result<String, StoreError> {
        match self.tasks.insert_one(TaskDocument::from(task)).await {
            Ok(_) => Ok(task.id.clone()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate(task.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_one(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.tasks
            .find_one(doc! { "_id": id })
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn find(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let docs: Vec<TaskDocument> = self
            .tasks
            .find(filter.to_document())
            .sort(doc! { "createdAt": -1 })
            .await?
            .try_collect()
            .await?;
        docs.into_iter().map(Task::try_from).collect()
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
        if patch.is_empty() {
            return self.find_one(id).await;
        }
        self.tasks
            .find_one_and_update(doc! { "_id": id }, set_document(patch))
            .return_document(ReturnDocument::After)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let res = self.tasks.delete_one(doc! { "_id": id }).await?;
        Ok(res.deleted_count > 0)
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64, StoreError> {
        Ok(self.tasks.count_documents(filter.to_document()).await?)
    }
}

pub struct MongoUserStore {
    users: Collection<User>,
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        match self.users.insert_one(user).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate(user.username.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.find_one(doc! { "username": username }).await?)
    }
}
