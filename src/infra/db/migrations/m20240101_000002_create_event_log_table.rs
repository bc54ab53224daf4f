//! Migration: Create the append-only event log table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EventLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EventLog::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EventLog::AggregateId).uuid().not_null())
                    .col(
                        ColumnDef::new(EventLog::MessageType)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(EventLog::Data).text().not_null())
                    .col(
                        ColumnDef::new(EventLog::OccurredOn)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Read-back is always per aggregate
        manager
            .create_index(
                Index::create()
                    .name("idx_event_log_aggregate_id")
                    .table(EventLog::Table)
                    .col(EventLog::AggregateId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EventLog::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum EventLog {
    Table,
    Id,
    AggregateId,
    MessageType,
    Data,
    OccurredOn,
}
