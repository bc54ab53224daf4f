//! Event log database entity for SeaORM.
//!
//! Rows are caller-identified and append-only; there is no update path.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "event_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub message_type: String,
    #[sea_orm(column_type = "Text")]
    pub data: String,
    pub occurred_on: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
