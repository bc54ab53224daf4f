//! Append-only durable store of serialized domain events.
//!
//! One record per raised event, keyed by aggregate id, written during the
//! post-commit phase of a transaction and never updated or deleted
//! afterward. The log is for audit and replay; it is not on the read path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::MESSAGE_TYPE_MAX_LEN;
use crate::domain::UserEvent;
use crate::errors::{AppError, AppResult};

use super::repositories::entities::event_log;

/// One appended event. `id` is caller-assigned, not store-generated.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogRecord {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub message_type: String,
    /// Serialized event payload, opaque to the store.
    pub data: String,
    pub occurred_on: DateTime<Utc>,
}

impl EventLogRecord {
    pub fn from_event(event: &UserEvent) -> AppResult<Self> {
        let data = serde_json::to_string(event)?;
        let mut message_type = event.event_type().to_string();
        message_type.truncate(MESSAGE_TYPE_MAX_LEN);

        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            message_type,
            data,
            occurred_on: event.occurred_on(),
        })
    }
}

impl From<event_log::Model> for EventLogRecord {
    fn from(model: event_log::Model) -> Self {
        Self {
            id: model.id,
            aggregate_id: model.aggregate_id,
            message_type: model.message_type,
            data: model.data,
            occurred_on: model.occurred_on,
        }
    }
}

/// Durable event log store.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append records; existing records are never touched.
    async fn append(&self, records: Vec<EventLogRecord>) -> AppResult<()>;

    /// All records for one aggregate, oldest first (replay/audit hook).
    async fn for_aggregate(&self, aggregate_id: Uuid) -> AppResult<Vec<EventLogRecord>>;
}

/// SQL-backed event log using the `event_log` table.
pub struct SqlEventLog {
    db: DatabaseConnection,
}

impl SqlEventLog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventLog for SqlEventLog {
    async fn append(&self, records: Vec<EventLogRecord>) -> AppResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let models: Vec<event_log::ActiveModel> = records
            .into_iter()
            .map(|r| event_log::ActiveModel {
                id: Set(r.id),
                aggregate_id: Set(r.aggregate_id),
                message_type: Set(r.message_type),
                data: Set(r.data),
                occurred_on: Set(r.occurred_on),
            })
            .collect();

        event_log::Entity::insert_many(models)
            .exec(&self.db)
            .await
            .map_err(AppError::from)?;

        Ok(())
    }

    async fn for_aggregate(&self, aggregate_id: Uuid) -> AppResult<Vec<EventLogRecord>> {
        let models = event_log::Entity::find()
            .filter(event_log::Column::AggregateId.eq(aggregate_id))
            .order_by_asc(event_log::Column::OccurredOn)
            .all(&self.db)
            .await
            .map_err(AppError::from)?;

        Ok(models.into_iter().map(EventLogRecord::from).collect())
    }
}

/// In-process event log used by the test-suite and local development.
#[derive(Default)]
pub struct MemoryEventLog {
    records: Mutex<Vec<EventLogRecord>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, records: Vec<EventLogRecord>) -> AppResult<()> {
        self.records.lock().unwrap().extend(records);
        Ok(())
    }

    async fn for_aggregate(&self, aggregate_id: Uuid) -> AppResult<Vec<EventLogRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }
}
