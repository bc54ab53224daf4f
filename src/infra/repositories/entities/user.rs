//! User database entity for SeaORM.

use sea_orm::entity::prelude::*;
use sea_orm::{Set, Unchanged};

use crate::domain::{User, UserRole};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    /// Soft delete timestamp (NULL = active, set = deleted)
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Convert database model to domain aggregate (no pending events).
impl From<Model> for User {
    fn from(model: Model) -> Self {
        User::from_stored(
            model.id,
            model.email,
            model.password_hash,
            model.name,
            UserRole::from(model.role.as_str()),
            model.created_at,
            model.updated_at,
            model.deleted_at,
        )
    }
}

impl ActiveModel {
    /// Active model for inserting a freshly created aggregate.
    pub fn insert_from(user: &User) -> Self {
        Self {
            id: Set(user.id),
            email: Set(user.email.clone()),
            password_hash: Set(user.password_hash.clone()),
            name: Set(user.name.clone()),
            role: Set(user.role.to_string()),
            created_at: Set(user.created_at),
            updated_at: Set(user.updated_at),
            deleted_at: Set(user.deleted_at),
        }
    }

    /// Active model for persisting a mutated aggregate. The id stays
    /// unchanged; everything else is written back.
    pub fn update_from(user: &User) -> Self {
        Self {
            id: Unchanged(user.id),
            email: Set(user.email.clone()),
            password_hash: Set(user.password_hash.clone()),
            name: Set(user.name.clone()),
            role: Set(user.role.to_string()),
            created_at: Set(user.created_at),
            updated_at: Set(user.updated_at),
            deleted_at: Set(user.deleted_at),
        }
    }
}
