//! Command side of the user pipeline.
//!
//! Every mutation loads (or creates) the aggregate, applies domain mutators
//! and hands the staged aggregate to the Unit of Work, which owns the
//! transaction and the post-commit event propagation. No-op updates commit
//! nothing and raise no events.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{User, UserRole, UserSnapshot};
use crate::errors::{AppError, AppResult, OptionExt};
use crate::infra::{ChangeSet, UnitOfWork, UserRepository};

#[cfg(test)]
use mockall::automock;

/// User management service trait for dependency injection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserService: Send + Sync {
    /// Create a new user. The email must not belong to an active user.
    async fn create_user(
        &self,
        email: String,
        password_hash: String,
        name: String,
    ) -> AppResult<UserSnapshot>;

    /// Update user fields. Fields left as `None` are unchanged; an update
    /// that changes nothing is a no-op.
    async fn update_user(
        &self,
        id: Uuid,
        name: Option<String>,
        email: Option<String>,
        role: Option<UserRole>,
    ) -> AppResult<UserSnapshot>;

    /// Soft delete a user.
    async fn delete_user(&self, id: Uuid) -> AppResult<()>;

    /// Restore a soft-deleted user.
    async fn restore_user(&self, id: Uuid) -> AppResult<UserSnapshot>;
}

/// Concrete implementation of UserService.
pub struct UserManager {
    repo: Arc<dyn UserRepository>,
    uow: Arc<dyn UnitOfWork>,
}

impl UserManager {
    pub fn new(repo: Arc<dyn UserRepository>, uow: Arc<dyn UnitOfWork>) -> Self {
        Self { repo, uow }
    }

    async fn commit_update(&self, user: User) -> AppResult<UserSnapshot> {
        let snapshot = user.snapshot();
        let mut changes = ChangeSet::new();
        changes.update(user);
        self.uow.commit(changes).await?;
        Ok(snapshot)
    }
}

#[async_trait]
impl UserService for UserManager {
    async fn create_user(
        &self,
        email: String,
        password_hash: String,
        name: String,
    ) -> AppResult<UserSnapshot> {
        // Pre-check for a friendlier error; the unique constraint still
        // backstops races inside the transaction.
        if self.repo.find_by_email(&email).await?.is_some() {
            return Err(AppError::conflict("user"));
        }

        let user = User::create(email, password_hash, name);
        let snapshot = user.snapshot();

        let mut changes = ChangeSet::new();
        changes.create(user);
        let receipt = self.uow.commit(changes).await?;

        tracing::info!(
            user_id = %snapshot.id,
            transaction_id = %receipt.transaction_id,
            "user created"
        );
        Ok(snapshot)
    }

    async fn update_user(
        &self,
        id: Uuid,
        name: Option<String>,
        email: Option<String>,
        role: Option<UserRole>,
    ) -> AppResult<UserSnapshot> {
        let mut user = self.repo.find_by_id(id).await?.ok_or_not_found()?;

        if let Some(name) = name {
            user.rename(name);
        }
        if let Some(email) = email {
            user.change_email(email);
        }
        if let Some(role) = role {
            user.change_role(role);
        }

        // Nothing changed, nothing to persist or project.
        if user.pending_events().is_empty() {
            return Ok(user.snapshot());
        }

        self.commit_update(user).await
    }

    async fn delete_user(&self, id: Uuid) -> AppResult<()> {
        let mut user = self.repo.find_by_id(id).await?.ok_or_not_found()?;

        user.soft_delete();
        self.commit_update(user).await?;

        tracing::info!(user_id = %id, "user soft deleted");
        Ok(())
    }

    async fn restore_user(&self, id: Uuid) -> AppResult<UserSnapshot> {
        let mut user = self
            .repo
            .find_by_id_with_deleted(id)
            .await?
            .ok_or_not_found()?;

        if user.is_active() {
            return Err(AppError::validation("user is not deleted"));
        }

        user.restore();
        self.commit_update(user).await
    }
}
