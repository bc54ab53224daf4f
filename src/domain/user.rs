//! User aggregate and related types.
//!
//! Every business-significant mutation appends exactly one domain event to
//! the aggregate's pending list before returning. Idempotent no-op mutations
//! (setting a field to its current value) raise nothing. The pending list is
//! read-only to external callers; only the transaction coordinator drains it,
//! via `ChangeSet::harvest`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ROLE_ADMIN, ROLE_USER};

use super::events::{UserEvent, UserSnapshot};

/// User roles enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl From<&str> for UserRole {
    fn from(s: &str) -> Self {
        match s {
            ROLE_ADMIN => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Admin => write!(f, "{}", ROLE_ADMIN),
            UserRole::User => write!(f, "{}", ROLE_USER),
        }
    }
}

/// User domain entity.
///
/// Accumulates uncommitted domain events as side effects of its own mutating
/// operations. The event list is append-only until the coordinator takes a
/// copy and clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft delete timestamp (None = active, Some = deleted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    events: Vec<UserEvent>,
}

impl User {
    /// Create a new user with default role, raising a Created event.
    pub fn create(email: String, password_hash: String, name: String) -> Self {
        let now = Utc::now();
        let mut user = Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            name,
            role: UserRole::User,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            events: Vec::new(),
        };
        user.record(UserEvent::Created {
            user: user.snapshot(),
            occurred_on: now,
        });
        user
    }

    /// Rehydrate an aggregate from stored state, with no pending events.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_stored(
        id: Uuid,
        email: String,
        password_hash: String,
        name: String,
        role: UserRole,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            email,
            password_hash,
            name,
            role,
            created_at,
            updated_at,
            deleted_at,
            events: Vec::new(),
        }
    }

    /// Check if user has admin role
    pub fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }

    /// Check if user is soft deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Check if user is active (not deleted)
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Update the user's name. No-op if unchanged.
    pub fn rename(&mut self, name: String) {
        if name == self.name {
            return;
        }
        self.name = name;
        self.touch_and_record_update();
    }

    /// Update the user's email. No-op if unchanged.
    pub fn change_email(&mut self, email: String) {
        if email == self.email {
            return;
        }
        self.email = email;
        self.touch_and_record_update();
    }

    /// Update the user's role. No-op if unchanged.
    pub fn change_role(&mut self, role: UserRole) {
        if role == self.role {
            return;
        }
        self.role = role;
        self.touch_and_record_update();
    }

    /// Soft delete the user, raising a Deleted event. No-op if already deleted.
    pub fn soft_delete(&mut self) {
        if self.is_deleted() {
            return;
        }
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
        self.record(UserEvent::Deleted {
            id: self.id,
            email: self.email.clone(),
            occurred_on: now,
        });
    }

    /// Restore a soft-deleted user. Raises an Updated event so the read
    /// model is re-projected. No-op if the user is active.
    pub fn restore(&mut self) {
        if self.is_active() {
            return;
        }
        self.deleted_at = None;
        self.touch_and_record_update();
    }

    /// Snapshot of the fields the read side needs, at the current state.
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Uncommitted domain events, in the order they were raised.
    pub fn pending_events(&self) -> &[UserEvent] {
        &self.events
    }

    /// Drain the pending events, clearing the list. Crate-private: only the
    /// transaction coordinator may take ownership of raised events.
    pub(crate) fn take_events(&mut self) -> Vec<UserEvent> {
        std::mem::take(&mut self.events)
    }

    fn touch_and_record_update(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.record(UserEvent::Updated {
            user: self.snapshot(),
            occurred_on: now,
        });
    }

    fn record(&mut self, event: UserEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let mut user = User::create(
            "test@example.com".to_string(),
            "hashed".to_string(),
            "Test User".to_string(),
        );
        user.take_events();
        user
    }

    #[test]
    fn create_raises_exactly_one_created_event() {
        let user = User::create(
            "test@example.com".to_string(),
            "hashed".to_string(),
            "Test User".to_string(),
        );

        assert_eq!(user.pending_events().len(), 1);
        assert!(matches!(user.pending_events()[0], UserEvent::Created { .. }));
        assert_eq!(user.pending_events()[0].aggregate_id(), user.id);
    }

    #[test]
    fn noop_mutations_raise_nothing() {
        let mut user = sample_user();

        user.rename("Test User".to_string());
        user.change_email("test@example.com".to_string());
        user.change_role(UserRole::User);

        assert!(user.pending_events().is_empty());
    }

    #[test]
    fn each_mutation_raises_one_event() {
        let mut user = sample_user();

        user.rename("Renamed".to_string());
        user.change_role(UserRole::Admin);

        assert_eq!(user.pending_events().len(), 2);
        assert!(user
            .pending_events()
            .iter()
            .all(|e| matches!(e, UserEvent::Updated { .. })));
    }

    #[test]
    fn double_delete_raises_single_event() {
        let mut user = sample_user();

        user.soft_delete();
        user.soft_delete();

        assert_eq!(user.pending_events().len(), 1);
        assert!(user.is_deleted());
    }

    #[test]
    fn take_events_clears_pending_list() {
        let mut user = sample_user();
        user.rename("Renamed".to_string());

        let events = user.take_events();

        assert_eq!(events.len(), 1);
        assert!(user.pending_events().is_empty());
        assert!(user.take_events().is_empty());
    }

    #[test]
    fn restore_reprojects_via_updated_event() {
        let mut user = sample_user();
        user.soft_delete();
        user.take_events();

        user.restore();

        assert!(user.is_active());
        assert_eq!(user.pending_events().len(), 1);
        assert!(matches!(user.pending_events()[0], UserEvent::Updated { .. }));
    }
}
