//! Infrastructure layer: entity store, event log, dispatcher, read store,
//! cache and the Unit of Work that ties a write transaction to event
//! propagation.

pub mod cache;
pub mod db;
pub mod dispatcher;
pub mod event_log;
pub mod read_store;
pub mod repositories;
pub mod retry;
pub mod unit_of_work;

pub use cache::{Cache, CacheBackend, CacheValue, MemoryBackend, RedisBackend};
pub use db::{Database, Migrator};
pub use dispatcher::{EventDispatcher, EventHandler};
pub use event_log::{EventLog, EventLogRecord, MemoryEventLog, SqlEventLog};
pub use read_store::{MemoryReadStore, MongoReadStore, UserQueryModel, UserReadStore};
pub use repositories::{UserRepository, UserStore};
pub use retry::RetryPolicy;
pub use unit_of_work::{ChangeSet, CommitReceipt, SyncUnitOfWork, UnitOfWork};
