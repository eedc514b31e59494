//! Producer with selectable delivery profiles.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use strata_core::config::ConfigError;
use strata_core::error::DomainError;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, instrument, warn};

use crate::broker::{LogMessage, LogWriter, RequiredAcks};
use crate::config::{DeliveryMode, ProducerConfig};
use crate::error::BrokerError;

/// Pause before the n-th retry is `RETRY_BACKOFF * n`.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Compensation invoked with the messages of a failed asynchronous write.
pub type DeliveryCallback = Arc<dyn Fn(&[LogMessage]) -> Result<(), DomainError> + Send + Sync>;

/// Trade-off between acknowledgement strength, latency and failure handling.
#[derive(Clone)]
pub enum DeliveryProfile {
    /// Wait for every replica; failures are returned to the caller.
    DurableSync,
    /// Wait for every replica in the background; failures are logged.
    AsyncLogged,
    /// Like [`DeliveryProfile::AsyncLogged`], and the callback is invoked
    /// with the failed messages.
    AsyncWithCallback(DeliveryCallback),
    /// No acknowledgement, short timeout, failures are only logged.
    FireAndForget,
}

impl fmt::Debug for DeliveryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DurableSync => "DurableSync",
            Self::AsyncLogged => "AsyncLogged",
            Self::AsyncWithCallback(_) => "AsyncWithCallback",
            Self::FireAndForget => "FireAndForget",
        })
    }
}

/// Publishes message batches through a [`LogWriter`] according to its
/// [`DeliveryProfile`].
///
/// Asynchronous profiles return as soon as the write is scheduled; call
/// [`Producer::flush`] or [`Producer::close`] to wait for the writes still in
/// flight. Dropping the producer detaches them instead of aborting them.
pub struct Producer {
    writer: Arc<dyn LogWriter>,
    profile: DeliveryProfile,
    config: ProducerConfig,
    in_flight: Mutex<JoinSet<()>>,
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("profile", &self.profile)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Producer {
    /// Creates a producer with an explicit profile.
    #[must_use]
    pub fn new(writer: Arc<dyn LogWriter>, profile: DeliveryProfile, config: ProducerConfig) -> Self {
        Self {
            writer,
            profile,
            config,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Creates a durable, synchronous producer.
    #[must_use]
    pub fn durable(writer: Arc<dyn LogWriter>, config: ProducerConfig) -> Self {
        Self::new(writer, DeliveryProfile::DurableSync, config)
    }

    /// Creates an asynchronous producer that logs failed writes.
    #[must_use]
    pub fn async_logged(writer: Arc<dyn LogWriter>, config: ProducerConfig) -> Self {
        Self::new(writer, DeliveryProfile::AsyncLogged, config)
    }

    /// Creates an asynchronous producer that hands failed writes to
    /// `callback`.
    #[must_use]
    pub fn async_with_callback(
        writer: Arc<dyn LogWriter>,
        config: ProducerConfig,
        callback: DeliveryCallback,
    ) -> Self {
        Self::new(writer, DeliveryProfile::AsyncWithCallback(callback), config)
    }

    /// Creates a fire-and-forget producer.
    #[must_use]
    pub fn fire_and_forget(writer: Arc<dyn LogWriter>, config: ProducerConfig) -> Self {
        Self::new(writer, DeliveryProfile::FireAndForget, config)
    }

    /// Creates the producer selected by `config.mode`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the mode needs a callback and none
    /// was given.
    pub fn from_config(
        writer: Arc<dyn LogWriter>,
        config: ProducerConfig,
        callback: Option<DeliveryCallback>,
    ) -> Result<Self, ConfigError> {
        let profile = match (config.mode, callback) {
            (DeliveryMode::Durable, _) => DeliveryProfile::DurableSync,
            (DeliveryMode::Async, _) => DeliveryProfile::AsyncLogged,
            (DeliveryMode::AsyncCallback, Some(callback)) => {
                DeliveryProfile::AsyncWithCallback(callback)
            }
            (DeliveryMode::AsyncCallback, None) => {
                return Err(ConfigError::Invalid {
                    key: "STRATA_DELIVERY_PROFILE",
                    value: "async-callback".into(),
                    reason: "no delivery callback supplied".into(),
                });
            }
            (DeliveryMode::FireAndForget, _) => DeliveryProfile::FireAndForget,
        };
        Ok(Self::new(writer, profile, config))
    }

    /// Returns the delivery profile.
    #[must_use]
    pub fn profile(&self) -> &DeliveryProfile {
        &self.profile
    }

    /// Publishes `messages` as one batch.
    ///
    /// # Errors
    ///
    /// Only [`DeliveryProfile::DurableSync`] reports write failures, after
    /// retrying transient ones up to `max_attempts` times. The other
    /// profiles log them and return `Ok`.
    #[instrument(skip_all, fields(profile = ?self.profile, count = messages.len()))]
    pub async fn publish(&self, messages: Vec<LogMessage>) -> Result<(), BrokerError> {
        if messages.is_empty() {
            return Ok(());
        }

        match &self.profile {
            DeliveryProfile::DurableSync => {
                write_with_retry(self.writer.as_ref(), &messages, &self.config).await
            }
            DeliveryProfile::AsyncLogged => {
                self.spawn_write(messages, None);
                Ok(())
            }
            DeliveryProfile::AsyncWithCallback(callback) => {
                self.spawn_write(messages, Some(Arc::clone(callback)));
                Ok(())
            }
            DeliveryProfile::FireAndForget => {
                let timeout = self.config.fire_and_forget_timeout;
                let write = self.writer.write_messages(&messages, RequiredAcks::None);
                match tokio::time::timeout(timeout, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(topic = %messages[0].topic, error = %e, "fire-and-forget write failed"),
                    Err(_) => warn!(topic = %messages[0].topic, ?timeout, "fire-and-forget write timed out"),
                }
                Ok(())
            }
        }
    }

    fn spawn_write(&self, messages: Vec<LogMessage>, callback: Option<DeliveryCallback>) {
        let writer = Arc::clone(&self.writer);
        let config = self.config.clone();
        let task = async move {
            let Err(e) = write_with_retry(writer.as_ref(), &messages, &config).await else {
                return;
            };
            let first = &messages[0];
            error!(topic = %first.topic, count = messages.len(), error = %e, "async write failed");
            if let Some(callback) = callback {
                if let Err(cb_err) = callback(&messages) {
                    error!(topic = %first.topic, error = %cb_err, "delivery callback failed");
                }
            }
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(task.instrument(Span::current()));
    }

    /// Waits for every asynchronous write scheduled so far.
    pub async fn flush(&self) {
        let mut pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *in_flight)
        };
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "async write task failed");
            }
        }
        debug!("producer flushed");
    }

    /// Waits for pending asynchronous writes before the producer goes away.
    pub async fn close(&self) {
        self.flush().await;
        debug!(profile = ?self.profile, "producer closed");
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        let in_flight = self.in_flight.get_mut().unwrap_or_else(PoisonError::into_inner);
        while in_flight.try_join_next().is_some() {}
        if !in_flight.is_empty() {
            warn!(pending = in_flight.len(), "producer dropped before flush, detaching writes in flight");
            in_flight.detach_all();
        }
    }
}

/// Writes with `RequiredAcks::All`, retrying transient failures.
async fn write_with_retry(
    writer: &dyn LogWriter,
    messages: &[LogMessage],
    config: &ProducerConfig,
) -> Result<(), BrokerError> {
    let max_attempts = config.max_attempts.get();
    let mut attempt: u32 = 1;
    loop {
        let write = writer.write_messages(messages, RequiredAcks::All);
        let result = match tokio::time::timeout(config.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(config.write_timeout)),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, "write failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Fails the first `failures` writes with `error`, then accepts.
    struct FlakyWriter {
        failures: usize,
        error: fn() -> BrokerError,
        calls: AtomicUsize,
        acks: Mutex<Vec<RequiredAcks>>,
    }

    impl FlakyWriter {
        fn new(failures: usize, error: fn() -> BrokerError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                calls: AtomicUsize::new(0),
                acks: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LogWriter for FlakyWriter {
        async fn write_messages(
            &self,
            _messages: &[LogMessage],
            acks: RequiredAcks,
        ) -> Result<(), BrokerError> {
            self.acks.lock().unwrap().push(acks);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(())
        }
    }

    fn unavailable() -> BrokerError {
        BrokerError::Unavailable("no leader".into())
    }

    fn batch() -> Vec<LogMessage> {
        vec![LogMessage::new("es_Order", b"[]".to_vec())]
    }

    fn config() -> ProducerConfig {
        ProducerConfig {
            max_attempts: NonZeroU32::new(3).unwrap(),
            ..ProducerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_durable_retries_transient_failures() {
        let writer = FlakyWriter::new(2, unavailable);
        let producer = Producer::durable(writer.clone(), config());

        producer.publish(batch()).await.unwrap();

        assert_eq!(writer.calls(), 3);
        assert!(writer.acks.lock().unwrap().iter().all(|a| *a == RequiredAcks::All));
    }

    #[tokio::test]
    async fn test_durable_gives_up_after_max_attempts() {
        let writer = FlakyWriter::new(usize::MAX, unavailable);
        let producer = Producer::durable(writer.clone(), config());

        let err = producer.publish(batch()).await.unwrap_err();

        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert_eq!(writer.calls(), 3);
    }

    #[tokio::test]
    async fn test_durable_does_not_retry_permanent_failures() {
        let writer = FlakyWriter::new(usize::MAX, || BrokerError::InvalidMessage("too large".into()));
        let producer = Producer::durable(writer.clone(), config());

        let err = producer.publish(batch()).await.unwrap_err();

        assert!(matches!(err, BrokerError::InvalidMessage(_)));
        assert_eq!(writer.calls(), 1);
    }

    #[tokio::test]
    async fn test_async_logged_swallows_failures() {
        let writer = FlakyWriter::new(usize::MAX, || BrokerError::Closed);
        let producer = Producer::async_logged(writer.clone(), config());

        producer.publish(batch()).await.unwrap();
        producer.flush().await;

        assert_eq!(writer.calls(), 1);
    }

    #[tokio::test]
    async fn test_async_callback_receives_failed_messages() {
        // Arrange
        let writer = FlakyWriter::new(usize::MAX, || BrokerError::Closed);
        let compensated = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&compensated);
        let callback: DeliveryCallback = Arc::new(move |messages: &[LogMessage]| {
            sink.lock().unwrap().extend(messages.iter().map(|m| m.topic.clone()));
            Ok(())
        });
        let producer = Producer::async_with_callback(writer, config(), callback);

        // Act
        producer.publish(batch()).await.unwrap();
        producer.flush().await;

        // Assert
        assert_eq!(*compensated.lock().unwrap(), vec!["es_Order".to_owned()]);
    }

    #[tokio::test]
    async fn test_async_callback_not_invoked_on_success() {
        let writer = FlakyWriter::new(0, unavailable);
        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invoked);
        let callback: DeliveryCallback = Arc::new(move |_: &[LogMessage]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let producer = Producer::async_with_callback(writer, config(), callback);

        producer.publish(batch()).await.unwrap();
        producer.flush().await;

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    async fn wait_for_calls(writer: &FlakyWriter, calls: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while writer.calls() < calls {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("write never reached the writer");
    }

    #[tokio::test]
    async fn test_dropped_producer_still_completes_async_writes() {
        // Arrange
        let writer = FlakyWriter::new(0, unavailable);
        let producer = Producer::async_logged(writer.clone(), config());
        producer.publish(batch()).await.unwrap();

        // Act
        drop(producer);

        // Assert
        wait_for_calls(&writer, 1).await;
        assert_eq!(*writer.acks.lock().unwrap(), vec![RequiredAcks::All]);
    }

    #[tokio::test]
    async fn test_dropped_producer_still_runs_delivery_callback() {
        let writer = FlakyWriter::new(usize::MAX, || BrokerError::Closed);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let callback: DeliveryCallback = Arc::new(move |messages: &[LogMessage]| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(messages.len());
            }
            Ok(())
        });
        let producer = Producer::async_with_callback(writer, config(), callback);
        producer.publish(batch()).await.unwrap();

        drop(producer);

        let failed = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_close_waits_for_async_writes() {
        let writer = FlakyWriter::new(0, unavailable);
        let producer = Producer::async_logged(writer.clone(), config());
        producer.publish(batch()).await.unwrap();

        producer.close().await;

        assert_eq!(writer.calls(), 1);
    }

    #[tokio::test]
    async fn test_fire_and_forget_writes_once_without_acks() {
        let writer = FlakyWriter::new(usize::MAX, unavailable);
        let producer = Producer::fire_and_forget(writer.clone(), config());

        producer.publish(batch()).await.unwrap();

        assert_eq!(writer.calls(), 1);
        assert_eq!(*writer.acks.lock().unwrap(), vec![RequiredAcks::None]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_written() {
        let writer = FlakyWriter::new(0, unavailable);
        let producer = Producer::durable(writer.clone(), config());

        producer.publish(Vec::new()).await.unwrap();

        assert_eq!(writer.calls(), 0);
    }

    #[test]
    fn test_from_config_requires_callback_for_async_callback_mode() {
        let writer = FlakyWriter::new(0, unavailable);
        let config = ProducerConfig {
            mode: DeliveryMode::AsyncCallback,
            ..ProducerConfig::default()
        };

        let err = Producer::from_config(writer, config, None).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid { key: "STRATA_DELIVERY_PROFILE", .. }
        ));
    }

    #[test]
    fn test_from_config_selects_profile_from_mode() {
        let writer = FlakyWriter::new(0, unavailable);
        let config = ProducerConfig {
            mode: DeliveryMode::FireAndForget,
            ..ProducerConfig::default()
        };

        let producer = Producer::from_config(writer, config, None).unwrap();

        assert!(matches!(producer.profile(), DeliveryProfile::FireAndForget));
    }
}
