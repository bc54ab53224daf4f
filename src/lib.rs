//! CQRS synchronization core for the user platform.
//!
//! Implements the write-side transaction → domain-event capture → durable
//! event log → read-model projection → cache invalidation pipeline:
//!
//! - **domain**: the `User` aggregate and the domain events it raises
//! - **infra**: transaction coordination (Unit of Work), event log, event
//!   dispatcher, read-store adapter, retry policies, cache
//! - **projections**: event handlers keeping the read store and cache in sync
//! - **services**: command and query services driving the pipeline
//! - **config**: environment configuration and constants
//! - **errors**: centralized error handling
//!
//! A write transaction either fully commits (entity state) or fully rolls
//! back; committed domain events are then propagated at-least-once to the
//! durable event log and to a separate read store, and are used to
//! invalidate stale cached reads.

pub mod config;
pub mod domain;
pub mod errors;
pub mod infra;
pub mod projections;
pub mod services;

// Re-export commonly used types at crate root
pub use config::Config;
pub use domain::{User, UserEvent, UserRole, UserSnapshot};
pub use errors::{AppError, AppResult};
pub use infra::{Cache, ChangeSet, EventDispatcher, SyncUnitOfWork, UnitOfWork};
