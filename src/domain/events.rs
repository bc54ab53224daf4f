//! Domain events raised by the `User` aggregate.
//!
//! Events are "fat": they carry a snapshot of the aggregate fields the read
//! side needs, so projections never re-query the write store. Once
//! constructed an event is immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point-in-time copy of the aggregate fields relevant to the read side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sum type over the event kinds the user aggregate can raise.
///
/// Projection handlers dispatch on the variant with an explicit `match`;
/// there is no runtime handler discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserEvent {
    Created {
        user: UserSnapshot,
        occurred_on: DateTime<Utc>,
    },
    Updated {
        user: UserSnapshot,
        occurred_on: DateTime<Utc>,
    },
    Deleted {
        id: Uuid,
        email: String,
        occurred_on: DateTime<Utc>,
    },
}

impl UserEvent {
    /// Stable event type name, recorded in the event log.
    pub fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created { .. } => "UserCreated",
            UserEvent::Updated { .. } => "UserUpdated",
            UserEvent::Deleted { .. } => "UserDeleted",
        }
    }

    /// Identity of the aggregate that raised this event.
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            UserEvent::Created { user, .. } | UserEvent::Updated { user, .. } => user.id,
            UserEvent::Deleted { id, .. } => *id,
        }
    }

    pub fn occurred_on(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created { occurred_on, .. }
            | UserEvent::Updated { occurred_on, .. }
            | UserEvent::Deleted { occurred_on, .. } => *occurred_on,
        }
    }
}
