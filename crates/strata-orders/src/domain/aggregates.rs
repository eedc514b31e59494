//! Aggregate roots for the Orders context.

use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::aggregate::{Aggregate, AggregateBase};
use strata_core::error::DomainError;
use strata_core::event::AggregateType;

use super::events::{ItemAdded, OrderCancelled, OrderCreated, OrderEvent, OrderPaid};

/// Aggregate type tag of orders; events are published on `{prefix}_Order`.
pub const ORDER: &str = "Order";

/// Lifecycle of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    /// Nothing has been recorded yet.
    #[default]
    New,
    /// Created and accepting items.
    Open,
    /// Paid in full. Terminal.
    Paid,
    /// Cancelled before payment. Terminal.
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    /// Stock-keeping unit of the item.
    pub sku: String,
    /// Number of units.
    pub quantity: u32,
    /// Price of one unit, in cents.
    pub unit_price_cents: u64,
}

impl OrderLine {
    /// Line total in cents, or `None` on overflow.
    #[must_use]
    pub fn total_cents(&self) -> Option<u64> {
        self.unit_price_cents.checked_mul(u64::from(self.quantity))
    }
}

/// The Order aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(flatten)]
    base: AggregateBase<OrderEvent>,
    customer_id: String,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    total_cents: u64,
}

impl Order {
    /// Creates an empty order handle for `id`, ready to be loaded or created.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let mut base = AggregateBase::new(AggregateType::new(ORDER));
        base.set_id(id);
        Self {
            base,
            customer_id: String::new(),
            status: OrderStatus::New,
            lines: Vec::new(),
            total_cents: 0,
        }
    }

    /// Returns the customer the order belongs to.
    #[must_use]
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the order lines in the order they were added.
    #[must_use]
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Returns the order total in cents.
    #[must_use]
    pub fn total_cents(&self) -> u64 {
        self.total_cents
    }

    /// Opens the order for `customer_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AlreadyExists` if the order was already created,
    /// or `DomainError::Validation` for a blank customer id.
    pub fn create(&mut self, customer_id: &str) -> Result<(), DomainError> {
        if self.status != OrderStatus::New {
            return Err(DomainError::AlreadyExists(self.id().to_owned()));
        }
        if customer_id.trim().is_empty() {
            return Err(DomainError::Validation("customer id must not be blank".into()));
        }
        self.apply(OrderEvent::Created(OrderCreated {
            customer_id: customer_id.to_owned(),
        }))
    }

    /// Adds `quantity` units of `sku` at `unit_price_cents` each.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not open, the line is
    /// empty, or the new total would overflow.
    pub fn add_item(
        &mut self,
        sku: &str,
        quantity: u32,
        unit_price_cents: u64,
    ) -> Result<(), DomainError> {
        self.ensure_open("add items to")?;
        if sku.trim().is_empty() {
            return Err(DomainError::Validation("sku must not be blank".into()));
        }
        if quantity == 0 {
            return Err(DomainError::Validation(format!("quantity of {sku} must be positive")));
        }
        let line = OrderLine {
            sku: sku.to_owned(),
            quantity,
            unit_price_cents,
        };
        if line.total_cents().and_then(|t| t.checked_add(self.total_cents)).is_none() {
            return Err(DomainError::Validation(format!(
                "total of order {} would overflow",
                self.id()
            )));
        }
        self.apply(OrderEvent::ItemAdded(ItemAdded {
            sku: line.sku,
            quantity,
            unit_price_cents,
        }))
    }

    /// Pays the order in full.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not open, has no
    /// lines, or `amount_cents` differs from the total.
    pub fn pay(&mut self, amount_cents: u64, payment_reference: &str) -> Result<(), DomainError> {
        self.ensure_open("pay")?;
        if self.lines.is_empty() {
            return Err(DomainError::Validation(format!("order {} has no items", self.id())));
        }
        if amount_cents != self.total_cents {
            return Err(DomainError::Validation(format!(
                "payment of {amount_cents} does not match total {} of order {}",
                self.total_cents,
                self.id()
            )));
        }
        self.apply(OrderEvent::Paid(OrderPaid {
            amount_cents,
            payment_reference: payment_reference.to_owned(),
        }))
    }

    /// Cancels an unpaid order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order is not open or the
    /// reason is blank.
    pub fn cancel(&mut self, reason: &str) -> Result<(), DomainError> {
        self.ensure_open("cancel")?;
        if reason.trim().is_empty() {
            return Err(DomainError::Validation("cancellation reason must not be blank".into()));
        }
        self.apply(OrderEvent::Cancelled(OrderCancelled {
            reason: reason.to_owned(),
        }))
    }

    fn ensure_open(&self, action: &str) -> Result<(), DomainError> {
        if self.status == OrderStatus::Open {
            return Ok(());
        }
        Err(DomainError::Validation(format!(
            "cannot {action} order {} while it is {}",
            self.id(),
            self.status
        )))
    }

    fn reject(&self, event: &OrderEvent) -> DomainError {
        DomainError::InvalidEvent(format!(
            "{event:?} does not apply to {} order {}",
            self.status,
            self.id()
        ))
    }
}

impl Aggregate for Order {
    type Event = OrderEvent;

    fn base(&self) -> &AggregateBase<OrderEvent> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AggregateBase<OrderEvent> {
        &mut self.base
    }

    fn when(&mut self, event: &OrderEvent) -> Result<(), DomainError> {
        match (self.status, event) {
            (OrderStatus::New, OrderEvent::Created(created)) => {
                self.customer_id.clone_from(&created.customer_id);
                self.status = OrderStatus::Open;
            }
            (OrderStatus::Open, OrderEvent::ItemAdded(added)) => {
                let line = OrderLine {
                    sku: added.sku.clone(),
                    quantity: added.quantity,
                    unit_price_cents: added.unit_price_cents,
                };
                self.total_cents = line
                    .total_cents()
                    .and_then(|t| t.checked_add(self.total_cents))
                    .ok_or_else(|| self.reject(event))?;
                self.lines.push(line);
            }
            (OrderStatus::Open, OrderEvent::Paid(_)) => self.status = OrderStatus::Paid,
            (OrderStatus::Open, OrderEvent::Cancelled(_)) => self.status = OrderStatus::Cancelled,
            _ => return Err(self.reject(event)),
        }
        Ok(())
    }
}
