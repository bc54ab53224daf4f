//! Domain layer - Core business entities and the events they raise.

pub mod events;
pub mod user;

pub use events::{UserEvent, UserSnapshot};
pub use user::{User, UserRole};
