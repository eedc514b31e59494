//! Event bus publishing committed event batches to the partitioned log.

use std::sync::Arc;

use async_trait::async_trait;
use strata_core::error::DomainError;
use strata_core::event::{AggregateType, Event};
use strata_core::event_bus::EventBus;
use tracing::{debug, instrument};

use crate::broker::{LogAdmin, LogMessage, TopicConfig};
use crate::config::EventBusConfig;
use crate::error::BrokerError;
use crate::producer::Producer;
use crate::propagation;

/// Returns the topic events of `aggregate_type` are published to.
#[must_use]
pub fn topic_name(prefix: &str, aggregate_type: &AggregateType) -> String {
    format!("{prefix}_{aggregate_type}")
}

/// Returns the provisioning definition of the topic for `aggregate_type`.
#[must_use]
pub fn topic_config(config: &EventBusConfig, aggregate_type: &AggregateType) -> TopicConfig {
    TopicConfig {
        name: topic_name(&config.topic_prefix, aggregate_type),
        partitions: config.partitions,
        replication_factor: config.replication_factor,
    }
}

/// Decodes the value of a message published by [`LogEventBus`].
///
/// # Errors
///
/// Returns `DomainError::Serialization` if the value is not an event batch.
pub fn decode_batch(message: &LogMessage) -> Result<Vec<Event>, DomainError> {
    Ok(serde_json::from_slice(&message.value)?)
}

/// Publishes each batch as one JSON message on
/// `{topic_prefix}_{aggregate_type}`, keyed by aggregate id and carrying the
/// current trace context in its headers.
#[derive(Debug, Clone)]
pub struct LogEventBus {
    producer: Arc<Producer>,
    config: EventBusConfig,
}

impl LogEventBus {
    /// Creates a bus publishing through `producer`.
    #[must_use]
    pub fn new(producer: Arc<Producer>, config: EventBusConfig) -> Self {
        Self { producer, config }
    }

    /// Returns the bus configuration.
    #[must_use]
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Returns the topic events of `aggregate_type` are published to.
    #[must_use]
    pub fn topic_for(&self, aggregate_type: &AggregateType) -> String {
        topic_name(&self.config.topic_prefix, aggregate_type)
    }

    /// Creates the topics of the given aggregate types.
    ///
    /// # Errors
    ///
    /// Returns the admin client's error.
    pub async fn provision_topics(
        &self,
        admin: &dyn LogAdmin,
        aggregate_types: &[AggregateType],
    ) -> Result<(), BrokerError> {
        let topics: Vec<TopicConfig> = aggregate_types
            .iter()
            .map(|t| topic_config(&self.config, t))
            .collect();
        admin.create_topics(&topics).await
    }
}

#[async_trait]
impl EventBus for LogEventBus {
    #[instrument(skip_all, fields(count = events.len()))]
    async fn process_events(&self, events: &[Event]) -> Result<(), DomainError> {
        let Some(first) = events.first() else {
            return Ok(());
        };

        let topic = self.topic_for(&first.aggregate_type);
        let value = serde_json::to_vec(events)?;
        let message = LogMessage::new(topic.as_str(), value)
            .with_key(first.aggregate_id.as_bytes())
            .with_headers(propagation::current_context_headers());

        self.producer
            .publish(vec![message])
            .await
            .map_err(|e| DomainError::Publish(format!("{topic}: {e}")))?;

        debug!(%topic, aggregate_id = %first.aggregate_id, "published events");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name_joins_prefix_and_type() {
        assert_eq!(topic_name("es", &AggregateType::new("Order")), "es_Order");
    }

    #[test]
    fn test_topic_config_uses_configured_layout() {
        let config = EventBusConfig {
            topic_prefix: "bank".into(),
            partitions: 6,
            replication_factor: 3,
        };

        let topic = topic_config(&config, &AggregateType::new("Account"));

        assert_eq!(
            topic,
            TopicConfig {
                name: "bank_Account".into(),
                partitions: 6,
                replication_factor: 3,
            }
        );
    }

    #[test]
    fn test_decode_batch_rejects_non_batch_payload() {
        let message = LogMessage::new("es_Order", b"{\"not\":\"a batch\"}".to_vec());

        let err = decode_batch(&message).unwrap_err();

        assert!(matches!(err, DomainError::Serialization(_)));
    }
}
