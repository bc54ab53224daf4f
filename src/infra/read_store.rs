//! Read store adapter (document store).
//!
//! One collection per query-model type, named after the type. Upserts and
//! deletes are wrapped in a bounded retry policy to absorb transient store
//! failures; after retries are exhausted the error propagates to the
//! projection handler, never silently swallowed.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::UserSnapshot;
use crate::errors::{AppError, AppResult};

use super::retry::RetryPolicy;

/// Denormalized, read-optimized representation of a user aggregate.
/// Eventually consistent with the write store, never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQueryModel {
    #[serde(rename = "_id", with = "uuid_string")]
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserQueryModel {
    /// Collection name; one collection per query-model type.
    pub const COLLECTION: &'static str = "UserQueryModel";
}

impl From<&UserSnapshot> for UserQueryModel {
    fn from(snapshot: &UserSnapshot) -> Self {
        Self {
            id: snapshot.id,
            email: snapshot.email.clone(),
            name: snapshot.name.clone(),
            role: snapshot.role.clone(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}

/// Serialize the id as its hyphenated string form so documents look the same
/// in BSON and in the cache's JSON.
mod uuid_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Projection target for the user read model.
#[async_trait]
pub trait UserReadStore: Send + Sync {
    /// Insert-or-replace keyed by id. Idempotent.
    async fn upsert(&self, model: UserQueryModel) -> AppResult<()>;

    /// Remove the matching document. A miss is a no-op, not an error.
    async fn delete_by_id(&self, id: Uuid) -> AppResult<()>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserQueryModel>>;

    async fn list(&self) -> AppResult<Vec<UserQueryModel>>;
}

/// MongoDB-backed read store.
pub struct MongoReadStore {
    collection: Collection<UserQueryModel>,
    retry: RetryPolicy,
}

impl MongoReadStore {
    /// Connect and ensure indexes.
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let client = Client::with_uri_str(&config.read_store_url)
            .await
            .map_err(AppError::from)?;
        let database = client.database(&config.read_store_db);
        let collection = database.collection(UserQueryModel::COLLECTION);

        let store = Self {
            collection,
            retry: RetryPolicy::read_store(),
        };
        store.ensure_indexes().await?;

        tracing::info!(collection = UserQueryModel::COLLECTION, "read store connected");
        Ok(store)
    }

    /// Unique, sparse index on the natural key: uniqueness is enforced
    /// without rejecting documents where the key is absent.
    async fn ensure_indexes(&self) -> AppResult<()> {
        let options = IndexOptions::builder().unique(true).sparse(true).build();
        let index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(options)
            .build();

        self.collection
            .create_index(index)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }
}

#[async_trait]
impl UserReadStore for MongoReadStore {
    async fn upsert(&self, model: UserQueryModel) -> AppResult<()> {
        let filter = doc! { "_id": model.id.to_string() };
        self.retry
            .run("read-store upsert", || async {
                self.collection
                    .replace_one(filter.clone(), &model)
                    .upsert(true)
                    .await
                    .map_err(AppError::from)?;
                Ok(())
            })
            .await
    }

    async fn delete_by_id(&self, id: Uuid) -> AppResult<()> {
        let filter = doc! { "_id": id.to_string() };
        self.retry
            .run("read-store delete", || async {
                self.collection
                    .delete_one(filter.clone())
                    .await
                    .map_err(AppError::from)?;
                Ok(())
            })
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserQueryModel>> {
        self.collection
            .find_one(doc! { "_id": id.to_string() })
            .await
            .map_err(AppError::from)
    }

    async fn list(&self) -> AppResult<Vec<UserQueryModel>> {
        let cursor = self.collection.find(doc! {}).await.map_err(AppError::from)?;
        cursor.try_collect().await.map_err(AppError::from)
    }
}

/// In-process read store used by the test-suite and local development.
/// Upsert-by-id and delete-by-id make it idempotent by construction.
#[derive(Default)]
pub struct MemoryReadStore {
    documents: Mutex<HashMap<Uuid, UserQueryModel>>,
}

impl MemoryReadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserReadStore for MemoryReadStore {
    async fn upsert(&self, model: UserQueryModel) -> AppResult<()> {
        self.documents.lock().unwrap().insert(model.id, model);
        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> AppResult<()> {
        self.documents.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserQueryModel>> {
        Ok(self.documents.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self) -> AppResult<Vec<UserQueryModel>> {
        Ok(self.documents.lock().unwrap().values().cloned().collect())
    }
}
