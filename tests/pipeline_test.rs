//! End-to-end pipeline tests: command service -> Unit of Work -> entity
//! store -> event dispatch -> projection -> read store + cache invalidation,
//! over an in-memory SQLite entity store and in-process read store, cache
//! and event log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use uuid::Uuid;

use cqrs_sync::config::{user_cache_key, CACHE_KEY_USERS};
use cqrs_sync::domain::{User, UserRole};
use cqrs_sync::errors::{AppError, AppResult};
use cqrs_sync::infra::{
    Cache, CacheBackend, ChangeSet, EventDispatcher, EventHandler, EventLog, MemoryBackend,
    MemoryEventLog,
    MemoryReadStore, Migrator, SyncUnitOfWork, UnitOfWork, UserQueryModel, UserReadStore,
    UserRepository, UserStore,
};
use cqrs_sync::projections::UserProjection;
use cqrs_sync::services::{UserManager, UserQueries, UserService};
use sea_orm_migration::MigratorTrait;

struct Pipeline {
    repo: Arc<dyn UserRepository>,
    uow: Arc<dyn UnitOfWork>,
    service: UserManager,
    queries: UserQueries,
    read_store: Arc<MemoryReadStore>,
    cache_backend: Arc<MemoryBackend>,
    event_log: Arc<MemoryEventLog>,
    projection: Arc<UserProjection>,
}

async fn connect_entity_store() -> DatabaseConnection {
    // one connection: each pooled connection to sqlite::memory: would see
    // its own empty database
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options.max_connections(1).min_connections(1);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

async fn pipeline() -> Pipeline {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let db = connect_entity_store().await;

    let read_store = Arc::new(MemoryReadStore::new());
    let cache_backend = Arc::new(MemoryBackend::new());
    let cache = Cache::new(Arc::clone(&cache_backend) as Arc<dyn CacheBackend>);
    let event_log = Arc::new(MemoryEventLog::new());

    let projection = Arc::new(UserProjection::new(
        Arc::clone(&read_store) as Arc<dyn UserReadStore>,
        cache.clone(),
    ));
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(Arc::clone(&projection) as Arc<dyn EventHandler>);

    let uow: Arc<dyn UnitOfWork> = Arc::new(SyncUnitOfWork::new(
        db.clone(),
        Arc::new(dispatcher),
        Arc::clone(&event_log) as _,
    ));
    let repo: Arc<dyn UserRepository> = Arc::new(UserStore::new(db.clone()));

    let service = UserManager::new(Arc::clone(&repo), Arc::clone(&uow));
    let queries = UserQueries::new(Arc::clone(&read_store) as Arc<dyn UserReadStore>, cache);

    Pipeline {
        repo,
        uow,
        service,
        queries,
        read_store,
        cache_backend,
        event_log,
        projection,
    }
}

#[tokio::test]
async fn created_user_reaches_entity_store_read_model_and_event_log() {
    let p = pipeline().await;

    let snapshot = p
        .service
        .create_user("new@example.com".into(), "hashed".into(), "New User".into())
        .await
        .unwrap();

    // entity store
    let stored = p.repo.find_by_id(snapshot.id).await.unwrap().unwrap();
    assert_eq!(stored.email, "new@example.com");

    // read model
    let doc = p.read_store.find_by_id(snapshot.id).await.unwrap().unwrap();
    assert_eq!(doc.name, "New User");
    assert_eq!(doc.role, "user");

    // event log
    let records = p.event_log.for_aggregate(snapshot.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_type, "UserCreated");
    assert!(records[0].data.contains("new@example.com"));
}

#[tokio::test]
async fn update_reprojects_the_read_model_and_appends_to_the_log() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("u@example.com".into(), "hashed".into(), "Before".into())
        .await
        .unwrap();

    p.service
        .update_user(snapshot.id, Some("After".into()), None, Some(UserRole::Admin))
        .await
        .unwrap();

    let doc = p.read_store.find_by_id(snapshot.id).await.unwrap().unwrap();
    assert_eq!(doc.name, "After");
    assert_eq!(doc.role, "admin");

    let records = p.event_log.for_aggregate(snapshot.id).await.unwrap();
    let types: Vec<&str> = records.iter().map(|r| r.message_type.as_str()).collect();
    // one Updated per field-group mutation, appended after the Created
    assert_eq!(types[0], "UserCreated");
    assert!(types[1..].iter().all(|t| *t == "UserUpdated"));
    assert!(types.len() > 1);
}

#[tokio::test]
async fn noop_update_commits_nothing_and_appends_nothing() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("same@example.com".into(), "hashed".into(), "Same".into())
        .await
        .unwrap();

    let updated = p
        .service
        .update_user(
            snapshot.id,
            Some("Same".into()),
            Some("same@example.com".into()),
            Some(UserRole::User),
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "Same");
    assert_eq!(p.event_log.len(), 1);
}

#[tokio::test]
async fn delete_removes_the_read_model_but_keeps_the_soft_deleted_row() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("gone@example.com".into(), "hashed".into(), "Gone".into())
        .await
        .unwrap();

    p.service.delete_user(snapshot.id).await.unwrap();

    // read model converged to absence
    assert!(p.read_store.find_by_id(snapshot.id).await.unwrap().is_none());

    // write side keeps the row, soft deleted
    assert!(p.repo.find_by_id(snapshot.id).await.unwrap().is_none());
    let raw = p
        .repo
        .find_by_id_with_deleted(snapshot.id)
        .await
        .unwrap()
        .unwrap();
    assert!(raw.is_deleted());

    let records = p.event_log.for_aggregate(snapshot.id).await.unwrap();
    assert_eq!(records.last().unwrap().message_type, "UserDeleted");
}

#[tokio::test]
async fn redelivered_events_converge_to_the_same_read_model_state() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("again@example.com".into(), "hashed".into(), "Again".into())
        .await
        .unwrap();

    // simulate at-least-once redelivery of the committed Created event
    let records = p.event_log.for_aggregate(snapshot.id).await.unwrap();
    let event: cqrs_sync::domain::UserEvent = serde_json::from_str(&records[0].data).unwrap();

    p.projection.handle(&event).await.unwrap();
    p.projection.handle(&event).await.unwrap();

    let all = p.read_store.list().await.unwrap();
    assert_eq!(all.iter().filter(|d| d.id == snapshot.id).count(), 1);
    assert_eq!(
        p.read_store
            .find_by_id(snapshot.id)
            .await
            .unwrap()
            .unwrap()
            .name,
        "Again"
    );
}

#[tokio::test]
async fn restore_brings_the_read_model_back() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("back@example.com".into(), "hashed".into(), "Back".into())
        .await
        .unwrap();

    p.service.delete_user(snapshot.id).await.unwrap();
    assert!(p.read_store.find_by_id(snapshot.id).await.unwrap().is_none());

    p.service.restore_user(snapshot.id).await.unwrap();

    let doc = p.read_store.find_by_id(snapshot.id).await.unwrap().unwrap();
    assert_eq!(doc.email, "back@example.com");
    assert!(p.repo.find_by_id(snapshot.id).await.unwrap().is_some());
}

#[tokio::test]
async fn duplicate_email_through_the_service_is_a_conflict() {
    let p = pipeline().await;
    p.service
        .create_user("dup@example.com".into(), "hashed".into(), "First".into())
        .await
        .unwrap();

    let result = p
        .service
        .create_user("dup@example.com".into(), "hashed".into(), "Second".into())
        .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(p.event_log.len(), 1);
    assert_eq!(p.read_store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unique_violation_inside_one_transaction_rolls_everything_back() {
    let p = pipeline().await;

    // two inserts with the same email staged in one transaction; the second
    // hits the unique constraint and the whole commit must roll back
    let mut changes = ChangeSet::new();
    changes.create(User::create(
        "race@example.com".into(),
        "hashed".into(),
        "First".into(),
    ));
    changes.create(User::create(
        "race@example.com".into(),
        "hashed".into(),
        "Second".into(),
    ));

    let result = p.uow.commit(changes).await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    // no partial entity-store state, no events propagated
    assert!(p.repo.list().await.unwrap().is_empty());
    assert!(p.event_log.is_empty());
    assert!(p.read_store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_changeset_commits_nothing() {
    let p = pipeline().await;

    let receipt = p.uow.commit(ChangeSet::new()).await.unwrap();

    assert_eq!(receipt.events_dispatched, 0);
    assert!(p.event_log.is_empty());
}

#[tokio::test]
async fn queries_are_cached_until_a_write_invalidates_them() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("c@example.com".into(), "hashed".into(), "Cached".into())
        .await
        .unwrap();

    // fill both cache entries
    let one = p.queries.get_user(snapshot.id).await.unwrap().unwrap();
    assert_eq!(one.name, "Cached");
    let all = p.queries.list_users().await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(p
        .cache_backend
        .get(&user_cache_key(snapshot.id))
        .await
        .unwrap()
        .is_some());
    assert!(p.cache_backend.get(CACHE_KEY_USERS).await.unwrap().is_some());

    // a write invalidates both keys, so the next read sees the new state
    p.service
        .update_user(snapshot.id, Some("Fresh".into()), None, None)
        .await
        .unwrap();

    assert!(p
        .cache_backend
        .get(&user_cache_key(snapshot.id))
        .await
        .unwrap()
        .is_none());
    assert!(p.cache_backend.get(CACHE_KEY_USERS).await.unwrap().is_none());

    let one = p.queries.get_user(snapshot.id).await.unwrap().unwrap();
    assert_eq!(one.name, "Fresh");
}

#[tokio::test]
async fn deleted_user_disappears_from_cached_queries() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("d@example.com".into(), "hashed".into(), "Doomed".into())
        .await
        .unwrap();
    assert!(p.queries.get_user(snapshot.id).await.unwrap().is_some());

    p.service.delete_user(snapshot.id).await.unwrap();

    // invalidated entry plus an absent document: the miss is not re-cached
    assert!(p.queries.get_user(snapshot.id).await.unwrap().is_none());
    assert!(p.queries.list_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn cache_entry_expires_at_the_backend_deadline() {
    let p = pipeline().await;
    let snapshot = p
        .service
        .create_user("t@example.com".into(), "hashed".into(), "Timed".into())
        .await
        .unwrap();

    // bypass the service-layer invalidation path entirely: seed, expire, read
    p.queries.get_user(snapshot.id).await.unwrap();
    p.cache_backend
        .expire(&user_cache_key(snapshot.id), Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(p
        .cache_backend
        .get(&user_cache_key(snapshot.id))
        .await
        .unwrap()
        .is_none());
    // read-through repopulates from the read store
    assert!(p.queries.get_user(snapshot.id).await.unwrap().is_some());
}

/// Read store whose first upsert is slow, exposing any reordering of
/// same-aggregate writes.
struct SlowFirstWrite {
    inner: MemoryReadStore,
    delay_first: AtomicBool,
}

#[async_trait::async_trait]
impl UserReadStore for SlowFirstWrite {
    async fn upsert(&self, model: UserQueryModel) -> AppResult<()> {
        if self.delay_first.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner.upsert(model).await
    }

    async fn delete_by_id(&self, id: Uuid) -> AppResult<()> {
        self.inner.delete_by_id(id).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserQueryModel>> {
        self.inner.find_by_id(id).await
    }

    async fn list(&self) -> AppResult<Vec<UserQueryModel>> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn slow_first_write_cannot_regress_the_read_model() {
    let store = Arc::new(SlowFirstWrite {
        inner: MemoryReadStore::new(),
        delay_first: AtomicBool::new(true),
    });
    let cache = Cache::new(Arc::new(MemoryBackend::new()) as Arc<dyn CacheBackend>);
    let projection = Arc::new(UserProjection::new(
        Arc::clone(&store) as Arc<dyn UserReadStore>,
        cache,
    ));
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(projection as Arc<dyn EventHandler>);

    // one transaction, three snapshots of the same aggregate; the slow
    // Created upsert must not land after the later Updated ones
    let mut user = User::create("slow@example.com".into(), "hashed".into(), "Before".into());
    user.rename("After".into());
    user.change_role(UserRole::Admin);
    let events = user.pending_events().to_vec();

    dispatcher.publish(&events).await.unwrap();

    let doc = store.find_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(doc.name, "After");
    assert_eq!(doc.role, "admin");
}
