//! Command abstractions.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Trait that all commands implement: enough to route to one aggregate.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The aggregate this command targets.
    fn aggregate_id(&self) -> &str;
}

/// Minimal command payload carrying only the target aggregate id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseCommand {
    /// The aggregate this command targets.
    #[serde(rename = "aggregateID")]
    pub aggregate_id: String,
}

impl BaseCommand {
    /// Creates a command for `aggregate_id`.
    #[must_use]
    pub fn new(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
        }
    }

    /// Rejects blank aggregate ids.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidAggregateId` if the id is empty or
    /// whitespace.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.aggregate_id.trim().is_empty() {
            return Err(DomainError::InvalidAggregateId(self.aggregate_id.clone()));
        }
        Ok(())
    }
}

impl Command for BaseCommand {
    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
}
