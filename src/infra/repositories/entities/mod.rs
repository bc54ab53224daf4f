//! SeaORM entities for the entity store and the event log.

pub mod event_log;
pub mod user;
