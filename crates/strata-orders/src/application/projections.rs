//! Order summary read model, fed from the event log.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use strata_core::aggregate::Aggregate;
use strata_core::error::DomainError;
use strata_core::event::{DomainEvent, Event};
use strata_messaging::broker::ConsumedMessage;
use strata_messaging::consumer_group::MessageProcessor;
use strata_messaging::error::WorkerError;
use strata_messaging::event_bus::decode_batch;
use strata_messaging::propagation;
use tracing::{debug, info_span};

use crate::domain::aggregates::{ORDER, Order, OrderStatus};
use crate::domain::events::OrderEvent;

/// Denormalized view of one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSummary {
    /// The order identifier.
    pub order_id: String,
    /// The customer the order belongs to.
    pub customer_id: String,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Number of lines.
    pub line_count: usize,
    /// Order total in cents.
    pub total_cents: u64,
    /// Version of the last event folded in.
    pub version: u64,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id().to_owned(),
            customer_id: order.customer_id().to_owned(),
            status: order.status(),
            line_count: order.lines().len(),
            total_cents: order.total_cents(),
            version: order.version(),
        }
    }
}

/// Folds published order events into [`OrderSummary`] rows.
///
/// Redelivered events (at or below the known version) are skipped, so
/// at-least-once delivery is safe. A batch that skips ahead of the known
/// version is rejected whole.
#[derive(Debug, Default)]
pub struct OrderSummaryProjection {
    orders: Mutex<HashMap<String, Order>>,
}

impl OrderSummaryProjection {
    /// Creates an empty projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Order>> {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the summary of one order.
    #[must_use]
    pub fn summary(&self, order_id: &str) -> Option<OrderSummary> {
        self.lock().get(order_id).map(OrderSummary::from)
    }

    /// Returns every summary, ordered by order id.
    #[must_use]
    pub fn summaries(&self) -> Vec<OrderSummary> {
        let mut summaries: Vec<OrderSummary> = self.lock().values().map(OrderSummary::from).collect();
        summaries.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        summaries
    }

    /// Folds one published batch in and returns how many events were new.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidEventVersion` for a gap, or any decoding
    /// or replay error. The projection is unchanged on error.
    pub fn apply_batch(&self, events: &[Event]) -> Result<usize, DomainError> {
        let mut orders = self.lock();
        let mut staged: HashMap<String, Order> = HashMap::new();
        let mut applied = 0;

        for record in events {
            if record.aggregate_type.as_str() != ORDER {
                return Err(DomainError::InvalidAggregate(format!(
                    "{} event {} of {} in order stream",
                    record.aggregate_type, record.event_type, record.aggregate_id
                )));
            }
            let order = staged
                .entry(record.aggregate_id.clone())
                .or_insert_with(|| {
                    orders
                        .get(&record.aggregate_id)
                        .cloned()
                        .unwrap_or_else(|| Order::new(record.aggregate_id.as_str()))
                });

            if record.version <= order.version() {
                debug!(aggregate_id = %record.aggregate_id, version = record.version, "skipping redelivered event");
                continue;
            }
            let expected = order.version() + 1;
            if record.version != expected {
                return Err(DomainError::InvalidEventVersion {
                    aggregate_id: record.aggregate_id.clone(),
                    expected,
                    actual: record.version,
                });
            }

            let event = OrderEvent::registry().decode(record)?;
            order.raise_event(&event)?;
            applied += 1;
        }

        orders.extend(staged);
        Ok(applied)
    }
}

#[async_trait]
impl MessageProcessor for OrderSummaryProjection {
    async fn process_message(
        &self,
        worker_id: usize,
        message: &ConsumedMessage,
    ) -> Result<(), WorkerError> {
        let span = info_span!(
            "project_order_events",
            worker_id,
            topic = %message.message.topic,
            partition = message.partition,
            offset = message.offset,
        );
        propagation::set_parent_from_headers(&span, &message.message.headers);

        let events = decode_batch(&message.message)?;
        let applied = span.in_scope(|| self.apply_batch(&events))?;
        debug!(worker_id, applied, "projected order events");
        Ok(())
    }
}
