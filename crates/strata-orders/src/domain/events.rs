//! Domain events for the Orders context.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use strata_core::codec::EventRegistry;
use strata_core::event::{DomainEvent, Metadata};

/// Event type names as persisted in the event store.
pub mod event_types {
    /// See [`super::OrderCreated`].
    pub const ORDER_CREATED: &str = "OrderCreated";
    /// See [`super::ItemAdded`].
    pub const ITEM_ADDED: &str = "ItemAdded";
    /// See [`super::OrderPaid`].
    pub const ORDER_PAID: &str = "OrderPaid";
    /// See [`super::OrderCancelled`].
    pub const ORDER_CANCELLED: &str = "OrderCancelled";
}

/// Emitted when an order is opened for a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    /// The customer placing the order.
    pub customer_id: String,
}

/// Emitted when a line is added to an open order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAdded {
    /// Stock-keeping unit of the item.
    pub sku: String,
    /// Number of units.
    pub quantity: u32,
    /// Price of one unit, in cents.
    pub unit_price_cents: u64,
}

/// Emitted when an order is paid in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaid {
    /// The amount paid, in cents.
    pub amount_cents: u64,
    /// Payment provider reference.
    pub payment_reference: String,
}

/// Emitted when an unpaid order is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    /// Why the order was cancelled.
    pub reason: String,
}

/// Event variants for the Orders context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// An order has been opened.
    Created(OrderCreated),
    /// An item has been added.
    ItemAdded(ItemAdded),
    /// The order has been paid.
    Paid(OrderPaid),
    /// The order has been cancelled.
    Cancelled(OrderCancelled),
}

static REGISTRY: LazyLock<EventRegistry<OrderEvent>> = LazyLock::new(|| {
    EventRegistry::new()
        .register(event_types::ORDER_CREATED, OrderEvent::Created)
        .register(event_types::ITEM_ADDED, OrderEvent::ItemAdded)
        .register(event_types::ORDER_PAID, OrderEvent::Paid)
        .register(event_types::ORDER_CANCELLED, OrderEvent::Cancelled)
});

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => event_types::ORDER_CREATED,
            Self::ItemAdded(_) => event_types::ITEM_ADDED,
            Self::Paid(_) => event_types::ORDER_PAID,
            Self::Cancelled(_) => event_types::ORDER_CANCELLED,
        }
    }

    fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Created(payload) => serde_json::to_vec(payload),
            Self::ItemAdded(payload) => serde_json::to_vec(payload),
            Self::Paid(payload) => serde_json::to_vec(payload),
            Self::Cancelled(payload) => serde_json::to_vec(payload),
        }
    }

    fn registry() -> &'static EventRegistry<Self> {
        &REGISTRY
    }

    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        if let Self::Paid(paid) = self {
            metadata.insert("paymentReference".to_owned(), paid.payment_reference.clone());
        }
        metadata
    }
}
