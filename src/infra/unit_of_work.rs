//! Unit of Work: coordinates one write transaction and the post-commit
//! propagation of the domain events it produced.
//!
//! Commit algorithm:
//! 1. Harvest pending events from every staged aggregate (before any
//!    physical write, so a failed persist cannot leave stray events).
//! 2. Open a read-committed transaction, persist entity state, commit.
//!    Transient store faults retry the whole step under an execution
//!    strategy; non-transient faults roll back and propagate.
//! 3. Only after a successful commit: dispatch the harvested events to the
//!    in-process subscribers and append them to the durable event log.
//!
//! Entity-state durability and event-log durability are deliberately not one
//! physical transaction. A post-commit failure is fatal for the request but
//! the data-store commit stands; a crash between commit and publish loses
//! the events (no outbox), leaving `EventLog::for_aggregate` as the
//! manual-replay hook.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{AccessMode, ActiveModelTrait, DatabaseConnection, IsolationLevel, TransactionTrait};
use uuid::Uuid;

use crate::domain::{User, UserEvent};
use crate::errors::{map_write_err, AppError, AppResult};

use super::dispatcher::EventDispatcher;
use super::event_log::{EventLog, EventLogRecord};
use super::repositories::entities::user;
use super::retry::RetryPolicy;

/// A staged write against the entity store.
enum StagedWrite {
    Insert(User),
    Update(User),
}

impl StagedWrite {
    fn user_mut(&mut self) -> &mut User {
        match self {
            StagedWrite::Insert(user) | StagedWrite::Update(user) => user,
        }
    }
}

/// The set of aggregates touched by one request. Staging transfers
/// ownership of the aggregate (and its pending events) to the coordinator;
/// `harvest` is the explicit drain that clears each pending list.
#[derive(Default)]
pub struct ChangeSet {
    staged: Vec<StagedWrite>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new aggregate for insertion.
    pub fn create(&mut self, user: User) {
        self.staged.push(StagedWrite::Insert(user));
    }

    /// Stage an existing aggregate for update (including soft deletes).
    pub fn update(&mut self, user: User) {
        self.staged.push(StagedWrite::Update(user));
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Total events pending across all staged aggregates.
    pub fn pending_event_count(&self) -> usize {
        self.staged
            .iter()
            .map(|w| match w {
                StagedWrite::Insert(u) | StagedWrite::Update(u) => u.pending_events().len(),
            })
            .sum()
    }

    /// Copy out every pending event, clearing each aggregate's list, in the
    /// order aggregates were staged and each aggregate raised them.
    fn harvest(&mut self) -> Vec<UserEvent> {
        let mut events = Vec::new();
        for write in &mut self.staged {
            events.append(&mut write.user_mut().take_events());
        }
        events
    }
}

/// Outcome of a successful commit, for log correlation.
#[derive(Debug, Clone, Copy)]
pub struct CommitReceipt {
    pub transaction_id: Uuid,
    pub events_dispatched: usize,
}

/// Unit of Work trait for dependency injection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Commit the staged writes and propagate their events.
    async fn commit(&self, changes: ChangeSet) -> AppResult<CommitReceipt>;
}

/// Concrete Unit of Work over the entity store, the event dispatcher and the
/// durable event log.
pub struct SyncUnitOfWork {
    db: DatabaseConnection,
    dispatcher: Arc<EventDispatcher>,
    event_log: Arc<dyn EventLog>,
    strategy: RetryPolicy,
}

impl SyncUnitOfWork {
    pub fn new(
        db: DatabaseConnection,
        dispatcher: Arc<EventDispatcher>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            db,
            dispatcher,
            event_log,
            strategy: RetryPolicy::execution_strategy(),
        }
    }

    async fn try_commit(&self, staged: &[StagedWrite]) -> AppResult<()> {
        let txn = self
            .db
            .begin_with_config(
                Some(IsolationLevel::ReadCommitted),
                Some(AccessMode::ReadWrite),
            )
            .await
            .map_err(AppError::from)?;

        let mut failure: Option<AppError> = None;
        for write in staged {
            let result = match write {
                StagedWrite::Insert(u) => user::ActiveModel::insert_from(u).insert(&txn).await,
                StagedWrite::Update(u) => user::ActiveModel::update_from(u).update(&txn).await,
            };
            if let Err(e) = result {
                failure = Some(map_write_err(e));
                break;
            }
        }

        if let Some(err) = failure {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::error!("Transaction rollback failed: {}", rollback_err);
            }
            return Err(err);
        }

        txn.commit().await.map_err(AppError::from)
    }
}

#[async_trait]
impl UnitOfWork for SyncUnitOfWork {
    async fn commit(&self, mut changes: ChangeSet) -> AppResult<CommitReceipt> {
        let transaction_id = Uuid::new_v4();

        // Harvest before the physical write.
        let events = changes.harvest();
        let staged = changes.staged;

        if staged.is_empty() {
            return Ok(CommitReceipt {
                transaction_id,
                events_dispatched: 0,
            });
        }

        self.strategy
            .run("entity-store transaction", || self.try_commit(&staged))
            .await?;

        // The commit stands from here on. The post-commit phase runs on its
        // own task so caller cancellation cannot abandon it halfway, which
        // would leave the event log permanently behind the entity store.
        let dispatcher = Arc::clone(&self.dispatcher);
        let event_log = Arc::clone(&self.event_log);
        let events_dispatched = events.len();
        let (publish_result, append_result) = tokio::spawn(async move {
            let publish = dispatcher.publish(&events).await;
            let append = match events
                .iter()
                .map(EventLogRecord::from_event)
                .collect::<AppResult<Vec<_>>>()
            {
                Ok(records) => event_log.append(records).await,
                Err(e) => Err(e),
            };
            (publish, append)
        })
        .await
        .map_err(|e| AppError::internal(format!("post-commit task failed: {e}")))?;

        let mut failures = Vec::new();
        if let Err(e) = publish_result {
            failures.push(format!("dispatch: {e}"));
        }
        if let Err(e) = append_result {
            failures.push(format!("event-log append: {e}"));
        }
        if !failures.is_empty() {
            let message = failures.join("; ");
            tracing::error!(
                transaction_id = %transaction_id,
                error = %message,
                "post-commit propagation failed; entity-store commit stands"
            );
            return Err(AppError::PostCommit {
                transaction_id,
                message,
            });
        }

        tracing::debug!(
            transaction_id = %transaction_id,
            events = events_dispatched,
            "transaction committed and events propagated"
        );
        Ok(CommitReceipt {
            transaction_id,
            events_dispatched,
        })
    }
}
