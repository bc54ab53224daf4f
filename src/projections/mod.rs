//! Read-model projections: event handlers that keep the read store
//! eventually consistent with the write side.

mod user_projection;

pub use user_projection::UserProjection;
