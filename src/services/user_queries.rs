//! Read side of the user pipeline: queries served from the cache, falling
//! back to the read store. Never touches the entity store.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::{user_cache_key, CACHE_KEY_USERS};
use crate::errors::AppResult;
use crate::infra::{Cache, UserQueryModel, UserReadStore};

/// Cached queries over the user read model.
pub struct UserQueries {
    read_store: Arc<dyn UserReadStore>,
    cache: Cache,
}

impl UserQueries {
    pub fn new(read_store: Arc<dyn UserReadStore>, cache: Cache) -> Self {
        Self { read_store, cache }
    }

    /// Fetch one user by id. Absent users are not cached.
    pub async fn get_user(&self, id: Uuid) -> AppResult<Option<UserQueryModel>> {
        let store = Arc::clone(&self.read_store);
        self.cache
            .get_or_create(&user_cache_key(id), || async move {
                store.find_by_id(id).await
            })
            .await
    }

    /// List all users. Empty results are not cached.
    pub async fn list_users(&self) -> AppResult<Vec<UserQueryModel>> {
        let store = Arc::clone(&self.read_store);
        self.cache
            .get_or_create(CACHE_KEY_USERS, || async move { store.list().await })
            .await
    }
}
