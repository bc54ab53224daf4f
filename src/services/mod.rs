//! Service layer - application business logic.

mod user_queries;
mod user_service;

pub use user_queries::UserQueries;
pub use user_service::{UserManager, UserService};
