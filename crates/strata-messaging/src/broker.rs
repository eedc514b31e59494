//! Partitioned-log broker contracts.
//!
//! A broker exposes three capabilities: writing batches of messages to named
//! topics, reading them back as a member of a consumer group, and creating
//! topics. Readers are shared by every worker of a pool, so
//! [`LogReader::fetch_message`] must be safe to call concurrently and must
//! hand each message to exactly one caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelScope;
use crate::error::BrokerError;

/// A message header. Values are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name.
    pub key: String,
    /// Header value.
    pub value: Vec<u8>,
}

impl Header {
    /// Creates a header.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message addressed to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Routing key.
    pub topic: String,
    /// Partitioning key; messages with the same key land on the same partition.
    pub key: Option<Vec<u8>>,
    /// Payload.
    pub value: Vec<u8>,
    /// Headers, e.g. trace context.
    pub headers: Vec<Header>,
    /// Producer-side creation time.
    pub time: DateTime<Utc>,
}

impl LogMessage {
    /// Creates an unkeyed message without headers, stamped now.
    #[must_use]
    pub fn new(topic: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value,
            headers: Vec::new(),
            time: Utc::now(),
        }
    }

    /// Sets the partitioning key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Appends headers.
    #[must_use]
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = Header>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Returns the value of the first header named `key`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_slice())
    }
}

/// A message delivered to a consumer, with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    /// Partition the message was read from.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// The message as written.
    pub message: LogMessage,
}

/// How many replicas must acknowledge a write before it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredAcks {
    /// Do not wait for any acknowledgement.
    None,
    /// Wait for the partition leader.
    Leader,
    /// Wait for every in-sync replica.
    All,
}

/// Topic definition used for provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: u32,
    /// Copies kept of each partition.
    pub replication_factor: u16,
}

/// Writes message batches.
#[async_trait]
pub trait LogWriter: Send + Sync {
    /// Writes `messages` in order and waits for `acks`.
    ///
    /// # Errors
    ///
    /// Returns a `BrokerError` if the batch was not accepted.
    async fn write_messages(
        &self,
        messages: &[LogMessage],
        acks: RequiredAcks,
    ) -> Result<(), BrokerError>;
}

/// Reads messages as one member of a consumer group.
#[async_trait]
pub trait LogReader: Send + Sync {
    /// Waits for the next message not yet handed to any member of the group.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Cancelled` if `cancel` fires first and
    /// `BrokerError::Closed` once the reader or the log is closed and drained.
    async fn fetch_message(&self, cancel: &CancelScope) -> Result<ConsumedMessage, BrokerError>;

    /// Marks messages as processed for the group.
    ///
    /// # Errors
    ///
    /// Returns a `BrokerError` if the offsets could not be stored.
    async fn commit_messages(&self, messages: &[ConsumedMessage]) -> Result<(), BrokerError>;

    /// Leaves the group. Pending and future fetches fail with
    /// `BrokerError::Closed`.
    ///
    /// # Errors
    ///
    /// Returns a `BrokerError` if the reader could not shut down cleanly.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Creates topics.
#[async_trait]
pub trait LogAdmin: Send + Sync {
    /// Creates the given topics. Existing topics are left unchanged.
    ///
    /// # Errors
    ///
    /// Returns a `BrokerError` if a definition is invalid or the broker
    /// refuses it.
    async fn create_topics(&self, topics: &[TopicConfig]) -> Result<(), BrokerError>;
}

/// Connection to a broker, handing out writers, group readers and admin
/// clients.
pub trait LogBroker: Send + Sync {
    /// Returns a writer.
    fn writer(&self) -> Arc<dyn LogWriter>;

    /// Joins `group_id` and subscribes to `topics`.
    ///
    /// # Errors
    ///
    /// Returns a `BrokerError` if the group cannot be joined.
    fn reader(&self, group_id: &str, topics: &[String]) -> Result<Arc<dyn LogReader>, BrokerError>;

    /// Returns an admin client.
    fn admin(&self) -> Arc<dyn LogAdmin>;
}
