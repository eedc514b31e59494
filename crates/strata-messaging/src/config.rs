//! Messaging configuration.

use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use strata_core::config::{self, ConfigError};

/// Topic prefix when `STRATA_TOPIC_PREFIX` is unset.
pub const DEFAULT_TOPIC_PREFIX: &str = "es";

/// Workers per pool when `STRATA_CONSUMER_POOL_SIZE` is unset.
pub const DEFAULT_POOL_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9);

/// Write attempts when `STRATA_PRODUCER_MAX_ATTEMPTS` is unset.
pub const DEFAULT_MAX_ATTEMPTS: NonZeroU32 = NonZeroU32::MIN.saturating_add(2);

/// Options for [`crate::event_bus::LogEventBus`] and topic provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusConfig {
    /// Topics are named `{topic_prefix}_{aggregate_type}`.
    pub topic_prefix: String,
    /// Partitions of provisioned topics.
    pub partitions: u32,
    /// Replication factor of provisioned topics.
    pub replication_factor: u16,
}

impl EventBusConfig {
    /// Reads `STRATA_TOPIC_PREFIX`, `STRATA_TOPIC_PARTITIONS` and
    /// `STRATA_TOPIC_REPLICATION_FACTOR`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for unparsable numbers or an empty
    /// prefix.
    pub fn from_env() -> Result<Self, ConfigError> {
        let topic_prefix =
            std::env::var("STRATA_TOPIC_PREFIX").unwrap_or_else(|_| DEFAULT_TOPIC_PREFIX.to_owned());
        if topic_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "STRATA_TOPIC_PREFIX",
                value: topic_prefix,
                reason: "must not be empty".into(),
            });
        }
        Ok(Self {
            topic_prefix,
            partitions: config::parse_or("STRATA_TOPIC_PARTITIONS", 10)?,
            replication_factor: config::parse_or("STRATA_TOPIC_REPLICATION_FACTOR", 1)?,
        })
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_owned(),
            partitions: 10,
            replication_factor: 1,
        }
    }
}

/// Options for [`crate::consumer_group::ConsumerGroup`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGroupConfig {
    /// Consumer group to join.
    pub group_id: String,
    /// Concurrent workers per pool.
    pub pool_size: NonZeroUsize,
}

impl ConsumerGroupConfig {
    /// Creates a config with the default pool size.
    #[must_use]
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: NonZeroUsize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Reads `STRATA_CONSUMER_GROUP` and `STRATA_CONSUMER_POOL_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` without a group id and
    /// `ConfigError::Invalid` for a zero or non-numeric pool size.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            group_id: config::required("STRATA_CONSUMER_GROUP")?,
            pool_size: config::parse_or("STRATA_CONSUMER_POOL_SIZE", DEFAULT_POOL_SIZE)?,
        })
    }
}

/// Delivery profile selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Acknowledged by all replicas, errors returned.
    #[default]
    Durable,
    /// Acknowledged by all replicas in the background, errors logged.
    Async,
    /// Like `Async`, plus a compensation callback.
    AsyncCallback,
    /// No acknowledgement.
    FireAndForget,
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "durable" => Ok(Self::Durable),
            "async" => Ok(Self::Async),
            "async-callback" => Ok(Self::AsyncCallback),
            "fire-and-forget" => Ok(Self::FireAndForget),
            other => Err(format!(
                "unknown delivery profile {other:?} (expected durable, async, async-callback or fire-and-forget)"
            )),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Durable => "durable",
            Self::Async => "async",
            Self::AsyncCallback => "async-callback",
            Self::FireAndForget => "fire-and-forget",
        })
    }
}

/// Options for [`crate::producer::Producer`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerConfig {
    /// Delivery profile.
    pub mode: DeliveryMode,
    /// Bound on each acknowledged write attempt.
    pub write_timeout: Duration,
    /// Bound on a fire-and-forget write.
    pub fire_and_forget_timeout: Duration,
    /// Attempts per acknowledged write, including the first.
    pub max_attempts: NonZeroU32,
}

impl ProducerConfig {
    /// Reads `STRATA_DELIVERY_PROFILE`, `STRATA_PRODUCER_WRITE_TIMEOUT_MS`,
    /// `STRATA_PRODUCER_FIRE_AND_FORGET_TIMEOUT_MS` and
    /// `STRATA_PRODUCER_MAX_ATTEMPTS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an unknown profile or unparsable
    /// numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            mode: config::parse_or("STRATA_DELIVERY_PROFILE", defaults.mode)?,
            write_timeout: Duration::from_millis(config::parse_or(
                "STRATA_PRODUCER_WRITE_TIMEOUT_MS",
                millis(defaults.write_timeout),
            )?),
            fire_and_forget_timeout: Duration::from_millis(config::parse_or(
                "STRATA_PRODUCER_FIRE_AND_FORGET_TIMEOUT_MS",
                millis(defaults.fire_and_forget_timeout),
            )?),
            max_attempts: config::parse_or("STRATA_PRODUCER_MAX_ATTEMPTS", defaults.max_attempts)?,
        })
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Durable,
            write_timeout: Duration::from_secs(5),
            fire_and_forget_timeout: Duration::from_secs(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
