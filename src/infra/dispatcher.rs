//! In-process event dispatcher.
//!
//! Delivers every committed event to every registered projection handler.
//! Events are delivered strictly in batch order: a transaction that raised
//! several events for one aggregate must see them applied oldest-first, or a
//! slow write for an early snapshot could overwrite a later one and leave
//! the read model permanently regressed. Within one event, fan-out across
//! handlers is concurrent. Delivery is at-least-once; a handler failure for
//! one event never prevents delivery of the remaining events, but surfaces
//! as an aggregate failure to the coordinator's post-commit step.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::domain::UserEvent;
use crate::errors::{AppError, AppResult};

/// A projection handler consuming committed domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &UserEvent) -> AppResult<()>;
}

/// Registry of projection handlers with ordered publish.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Deliver the events one at a time in batch order, fanning out to all
    /// handlers concurrently per event and awaiting every delivery before
    /// moving to the next. Failures are collected and reported as a single
    /// `Projection` error after the whole batch has been attempted.
    pub async fn publish(&self, events: &[UserEvent]) -> AppResult<()> {
        if events.is_empty() || self.handlers.is_empty() {
            return Ok(());
        }

        let mut failures: Vec<String> = Vec::new();
        for event in events {
            let deliveries = self.handlers.iter().map(|handler| async move {
                handler
                    .handle(event)
                    .await
                    .map_err(|e| format!("{}: {}", event.event_type(), e))
            });

            failures.extend(
                join_all(deliveries)
                    .await
                    .into_iter()
                    .filter_map(Result::err),
            );
        }

        if failures.is_empty() {
            tracing::debug!(events = events.len(), "events dispatched");
            Ok(())
        } else {
            tracing::error!(
                failed = failures.len(),
                total = events.len() * self.handlers.len(),
                "one or more projection handlers failed"
            );
            Err(AppError::Projection(failures.join("; ")))
        }
    }
}
