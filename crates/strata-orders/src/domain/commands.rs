//! Commands for the Orders context.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_core::command::{BaseCommand, Command};
use strata_core::error::DomainError;

/// Command to open a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    /// The target order.
    #[serde(flatten)]
    pub base: BaseCommand,
    /// The customer placing the order.
    pub customer_id: String,
}

/// Command to add a line to an open order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItem {
    /// The target order.
    #[serde(flatten)]
    pub base: BaseCommand,
    /// Stock-keeping unit of the item.
    pub sku: String,
    /// Number of units.
    pub quantity: u32,
    /// Price of one unit, in cents.
    pub unit_price_cents: u64,
}

/// Command to pay an open order in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayOrder {
    /// The target order.
    #[serde(flatten)]
    pub base: BaseCommand,
    /// The amount paid, in cents.
    pub amount_cents: u64,
    /// Payment provider reference.
    pub payment_reference: String,
}

/// Command to cancel an unpaid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrder {
    /// The target order.
    #[serde(flatten)]
    pub base: BaseCommand,
    /// Why the order is cancelled.
    pub reason: String,
}

macro_rules! impl_command {
    ($($command:ty),+ $(,)?) => {
        $(
            impl Command for $command {
                fn aggregate_id(&self) -> &str {
                    &self.base.aggregate_id
                }
            }
        )+
    };
}

impl_command!(CreateOrder, AddItem, PayOrder, CancelOrder);

/// Any command the Orders context accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
    /// See [`CreateOrder`].
    Create(CreateOrder),
    /// See [`AddItem`].
    AddItem(AddItem),
    /// See [`PayOrder`].
    Pay(PayOrder),
    /// See [`CancelOrder`].
    Cancel(CancelOrder),
}

impl OrderCommand {
    /// Decodes a JSON command by its type name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidCommandType` for an unknown name, or
    /// `DomainError::Serialization` if the payload does not match it.
    pub fn decode(command_type: &str, payload: &[u8]) -> Result<Self, DomainError> {
        fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DomainError> {
            Ok(serde_json::from_slice(payload)?)
        }

        match command_type {
            "CreateOrder" => parse(payload).map(Self::Create),
            "AddItem" => parse(payload).map(Self::AddItem),
            "PayOrder" => parse(payload).map(Self::Pay),
            "CancelOrder" => parse(payload).map(Self::Cancel),
            other => Err(DomainError::InvalidCommandType(other.to_owned())),
        }
    }

    /// Returns the shared part of the command.
    #[must_use]
    pub fn base(&self) -> &BaseCommand {
        match self {
            Self::Create(c) => &c.base,
            Self::AddItem(c) => &c.base,
            Self::Pay(c) => &c.base,
            Self::Cancel(c) => &c.base,
        }
    }
}

impl Command for OrderCommand {
    fn aggregate_id(&self) -> &str {
        &self.base().aggregate_id
    }
}
