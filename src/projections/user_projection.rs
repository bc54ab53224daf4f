//! Projects user domain events into the read store.
//!
//! Idempotent by construction: Created and Updated both upsert by id, Deleted
//! deletes by id, so redelivery of any event converges to the same document
//! state. Cache invalidation runs unconditionally after the store attempt,
//! whether it succeeded or not; a stale cache entry must not outlive the
//! event that changed the data.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{user_cache_key, CACHE_KEY_USERS};
use crate::domain::UserEvent;
use crate::errors::AppResult;
use crate::infra::{Cache, EventHandler, UserQueryModel, UserReadStore};

/// Keeps the user read model and its cache keys in step with domain events.
pub struct UserProjection {
    read_store: Arc<dyn UserReadStore>,
    cache: Cache,
}

impl UserProjection {
    pub fn new(read_store: Arc<dyn UserReadStore>, cache: Cache) -> Self {
        Self { read_store, cache }
    }

    async fn invalidate(&self, aggregate_id: Uuid) -> AppResult<()> {
        self.cache
            .remove(&[CACHE_KEY_USERS.to_string(), user_cache_key(aggregate_id)])
            .await
    }
}

#[async_trait]
impl EventHandler for UserProjection {
    async fn handle(&self, event: &UserEvent) -> AppResult<()> {
        let aggregate_id = event.aggregate_id();

        let store_result = match event {
            UserEvent::Created { user, .. } | UserEvent::Updated { user, .. } => {
                self.read_store.upsert(UserQueryModel::from(user)).await
            }
            UserEvent::Deleted { id, .. } => self.read_store.delete_by_id(*id).await,
        };

        // Invalidation is unconditional: even when the store write failed the
        // cached copy may no longer match the write side.
        let cache_result = self.invalidate(aggregate_id).await;
        if let Err(ref e) = cache_result {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                error = %e,
                "cache invalidation failed after projection"
            );
        }

        store_result?;
        cache_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::User;
    use crate::infra::{MemoryBackend, MemoryReadStore};

    fn projection() -> (Arc<MemoryReadStore>, Arc<MemoryBackend>, UserProjection) {
        let store = Arc::new(MemoryReadStore::new());
        let backend = Arc::new(MemoryBackend::new());
        let cache = Cache::new(Arc::clone(&backend) as Arc<dyn crate::infra::CacheBackend>);
        let projection =
            UserProjection::new(Arc::clone(&store) as Arc<dyn UserReadStore>, cache);
        (store, backend, projection)
    }

    #[tokio::test]
    async fn created_event_materializes_a_document() {
        let (store, _, projection) = projection();
        let user = User::create("a@example.com".into(), "h".into(), "A".into());

        projection.handle(&user.pending_events()[0]).await.unwrap();

        let found = store.find_by_id(user.id).await.unwrap();
        assert_eq!(found.unwrap().email, "a@example.com");
    }

    #[tokio::test]
    async fn deleted_event_removes_the_document_and_redelivery_converges() {
        let (store, _, projection) = projection();
        let mut user = User::create("a@example.com".into(), "h".into(), "A".into());
        projection.handle(&user.pending_events()[0]).await.unwrap();
        user.take_events();

        user.soft_delete();
        let deleted = user.pending_events()[0].clone();

        projection.handle(&deleted).await.unwrap();
        assert!(store.find_by_id(user.id).await.unwrap().is_none());

        // at-least-once delivery: a second handling is a no-op
        projection.handle(&deleted).await.unwrap();
        assert!(store.find_by_id(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handling_invalidates_collection_and_item_keys() {
        use crate::infra::CacheBackend;
        use std::time::Duration;

        let (_, backend, projection) = projection();
        let user = User::create("a@example.com".into(), "h".into(), "A".into());
        let ttl = Duration::from_secs(60);

        backend
            .set(CACHE_KEY_USERS, "stale-collection".into(), ttl)
            .await
            .unwrap();
        backend
            .set(&user_cache_key(user.id), "stale-item".into(), ttl)
            .await
            .unwrap();

        projection.handle(&user.pending_events()[0]).await.unwrap();

        assert!(backend.get(CACHE_KEY_USERS).await.unwrap().is_none());
        assert!(backend
            .get(&user_cache_key(user.id))
            .await
            .unwrap()
            .is_none());
    }
}
