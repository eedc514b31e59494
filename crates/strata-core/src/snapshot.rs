//! Snapshots: compacted aggregate state used to short-circuit replay.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::event::AggregateType;

/// The current snapshot of one aggregate. At most one exists per aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Aggregate this snapshot belongs to.
    pub aggregate_id: String,
    /// Type of the aggregate.
    pub aggregate_type: AggregateType,
    /// Serialized aggregate state.
    pub state: Vec<u8>,
    /// Aggregate version at capture time.
    pub version: u64,
}

impl Snapshot {
    /// Captures the current state of `aggregate`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the aggregate cannot be encoded.
    pub fn from_aggregate<A: Aggregate>(aggregate: &A) -> Result<Self, DomainError> {
        let state = serde_json::to_vec(aggregate).map_err(|e| {
            DomainError::Serialization(format!(
                "encode snapshot for aggregate {}: {e}",
                aggregate.id()
            ))
        })?;

        Ok(Self {
            aggregate_id: aggregate.id().to_owned(),
            aggregate_type: aggregate.aggregate_type().clone(),
            state,
            version: aggregate.version(),
        })
    }

    /// Deserializes the captured state back into an aggregate, restoring its
    /// identity, version and domain fields.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state does not decode, or
    /// `DomainError::InvalidAggregate` if the decoded version or type
    /// disagrees with the snapshot record.
    pub fn restore<A: Aggregate>(&self) -> Result<A, DomainError> {
        let aggregate: A = serde_json::from_slice(&self.state).map_err(|e| {
            DomainError::Serialization(format!(
                "decode snapshot for aggregate {}: {e}",
                self.aggregate_id
            ))
        })?;

        if aggregate.version() != self.version {
            return Err(DomainError::InvalidAggregate(format!(
                "snapshot of {} records version {} but state holds version {}",
                self.aggregate_id,
                self.version,
                aggregate.version()
            )));
        }
        if aggregate.aggregate_type() != &self.aggregate_type {
            return Err(DomainError::InvalidAggregate(format!(
                "snapshot of {} records type {} but state holds type {}",
                self.aggregate_id,
                self.aggregate_type,
                aggregate.aggregate_type()
            )));
        }

        Ok(aggregate)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AggregateID: {}, AggregateType: {}, StateSize: {}, Version: {}",
            self.aggregate_id,
            self.aggregate_type,
            self.state.len(),
            self.version
        )
    }
}
