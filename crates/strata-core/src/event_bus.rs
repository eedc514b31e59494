//! Publication of committed events.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::Event;

/// Announces committed events to downstream consumers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one save's events as a single batch, preserving their order.
    ///
    /// Failures are reported as `DomainError::Publish`.
    async fn process_events(&self, events: &[Event]) -> Result<(), DomainError>;
}
