//! Consumer-group worker pools.
//!
//! A [`ConsumerGroup`] joins a group once per call, shares the resulting
//! reader between `pool_size` workers, and waits for all of them. What
//! happens when a worker fails is decided by a [`FailurePolicy`]:
//!
//! - [`FailurePolicy::Continue`]: the failure is logged and the other
//!   workers keep going; the call returns `Ok` once every worker has ended.
//! - [`FailurePolicy::CancelOnError`]: the first failure cancels the pool's
//!   scope, siblings return at their next blocking fetch, and that first
//!   error is returned after all of them have unwound.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::broker::{ConsumedMessage, LogBroker, LogReader};
use crate::cancel::CancelScope;
use crate::config::ConsumerGroupConfig;
use crate::error::{BrokerError, WorkerError};

/// What a pool does when one of its workers fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and let the other workers continue.
    Continue,
    /// Cancel every worker and return the first error.
    CancelOnError,
}

/// Everything a worker needs: its index, the shared reader and the pool's
/// cancellation scope.
#[derive(Clone)]
pub struct WorkerContext {
    /// Index within the pool, for log correlation only.
    pub worker_id: usize,
    /// Reader shared by the whole pool.
    pub reader: Arc<dyn LogReader>,
    /// Cancelled when the pool is shutting down.
    pub cancel: CancelScope,
}

impl WorkerContext {
    /// Fetches the next message, giving up when the pool is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Cancelled` or `BrokerError::Closed` when the
    /// worker should stop, or any other reader error.
    pub async fn fetch(&self) -> Result<ConsumedMessage, BrokerError> {
        self.reader.fetch_message(&self.cancel).await
    }

    /// Commits one processed message.
    ///
    /// # Errors
    ///
    /// Returns the reader's error.
    pub async fn commit(&self, message: &ConsumedMessage) -> Result<(), BrokerError> {
        self.reader
            .commit_messages(std::slice::from_ref(message))
            .await
    }
}

/// Handles one message at a time for [`ConsumerGroup::consume_with_processor`].
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Processes `message` on behalf of worker `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns a `WorkerError` if the message could not be handled.
    async fn process_message(
        &self,
        worker_id: usize,
        message: &ConsumedMessage,
    ) -> Result<(), WorkerError>;
}

/// Runs worker pools for one consumer group.
#[derive(Clone)]
pub struct ConsumerGroup {
    broker: Arc<dyn LogBroker>,
    config: ConsumerGroupConfig,
}

impl ConsumerGroup {
    /// Creates a consumer group on `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn LogBroker>, config: ConsumerGroupConfig) -> Self {
        Self { broker, config }
    }

    /// Returns the group configuration.
    #[must_use]
    pub fn config(&self) -> &ConsumerGroupConfig {
        &self.config
    }

    /// Runs a tolerant pool: worker failures and panics are logged, never
    /// returned. Cancelling `cancel` stops the workers at their next fetch.
    ///
    /// # Errors
    ///
    /// Returns a `BrokerError` only if the group could not be joined.
    pub async fn consume_topics<W, Fut>(
        &self,
        topics: &[String],
        cancel: &CancelScope,
        worker: W,
    ) -> Result<(), BrokerError>
    where
        W: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        match self
            .fan_out(topics, cancel, FailurePolicy::Continue, worker)
            .await
        {
            Err(WorkerError::Broker(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Runs a fail-fast pool: the first worker error cancels the others.
    ///
    /// # Errors
    ///
    /// Returns the first worker's error, after every worker has returned.
    pub async fn consume_topics_fail_fast<W, Fut>(
        &self,
        topics: &[String],
        cancel: &CancelScope,
        worker: W,
    ) -> Result<(), WorkerError>
    where
        W: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        self.fan_out(topics, cancel, FailurePolicy::CancelOnError, worker)
            .await
    }

    /// Runs a fetch, process, commit loop on every worker.
    ///
    /// Under [`FailurePolicy::Continue`] a message the processor rejects is
    /// logged and committed so the group moves past it; under
    /// [`FailurePolicy::CancelOnError`] it stays uncommitted and the pool
    /// stops.
    ///
    /// # Errors
    ///
    /// Returns the first processing or broker error under
    /// [`FailurePolicy::CancelOnError`]; otherwise only a failure to join the
    /// group.
    pub async fn consume_with_processor<P>(
        &self,
        topics: &[String],
        cancel: &CancelScope,
        processor: Arc<P>,
        policy: FailurePolicy,
    ) -> Result<(), WorkerError>
    where
        P: MessageProcessor + 'static,
    {
        self.fan_out(topics, cancel, policy, move |ctx| {
            let processor = Arc::clone(&processor);
            async move { process_loop(&ctx, processor.as_ref(), policy).await }
        })
        .await
    }

    async fn fan_out<W, Fut>(
        &self,
        topics: &[String],
        parent: &CancelScope,
        policy: FailurePolicy,
        worker: W,
    ) -> Result<(), WorkerError>
    where
        W: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let group_id = self.config.group_id.as_str();
        let pool_size = self.config.pool_size.get();
        let reader = self.broker.reader(group_id, topics)?;
        info!(group_id, ?topics, pool_size, ?policy, "starting consumer pool");

        let scope = match policy {
            FailurePolicy::Continue => parent.clone(),
            FailurePolicy::CancelOnError => CancelScope::new(),
        };

        let mut workers = JoinSet::new();
        for worker_id in 0..pool_size {
            let ctx = WorkerContext {
                worker_id,
                reader: Arc::clone(&reader),
                cancel: scope.clone(),
            };
            let run = worker(ctx).instrument(info_span!("consumer_worker", group_id, worker_id));
            workers.spawn(supervise(worker_id, run));
        }

        let mut first_error = None;
        loop {
            let joined = tokio::select! {
                joined = workers.join_next() => joined,
                () = parent.cancelled(), if !scope.is_cancelled() => {
                    scope.cancel();
                    continue;
                }
            };
            let Some(joined) = joined else {
                break;
            };
            let (worker_id, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "worker supervisor failed");
                    continue;
                }
            };

            match (result, policy) {
                (Ok(()), _) => debug!(worker_id, "worker finished"),
                (Err(e), FailurePolicy::Continue) => {
                    error!(worker_id, error = %e, "worker failed");
                }
                (Err(e), FailurePolicy::CancelOnError) if first_error.is_none() => {
                    warn!(worker_id, error = %e, "worker failed, cancelling pool");
                    scope.cancel();
                    first_error = Some(e);
                }
                (Err(e), FailurePolicy::CancelOnError) => {
                    debug!(worker_id, error = %e, "worker failed after cancellation");
                }
            }
        }

        if let Err(e) = reader.close().await {
            warn!(group_id, error = %e, "reader close failed");
        }
        info!(group_id, failed = first_error.is_some(), "consumer pool stopped");

        first_error.map_or(Ok(()), Err)
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one worker in its own task so a panic becomes
/// `WorkerError::Panicked` instead of tearing down the pool.
async fn supervise<F>(worker_id: usize, run: F) -> (usize, Result<(), WorkerError>)
where
    F: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(run));
    let result = match (&mut task.0).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(WorkerError::Panicked { worker_id }),
        Err(_) => Err(WorkerError::Broker(BrokerError::Cancelled)),
    };
    (worker_id, result)
}

async fn process_loop(
    ctx: &WorkerContext,
    processor: &dyn MessageProcessor,
    policy: FailurePolicy,
) -> Result<(), WorkerError> {
    loop {
        let message = match ctx.fetch().await {
            Ok(message) => message,
            Err(BrokerError::Cancelled | BrokerError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match processor.process_message(ctx.worker_id, &message).await {
            Ok(()) => {}
            Err(e) if policy == FailurePolicy::Continue => {
                warn!(
                    worker_id = ctx.worker_id,
                    topic = %message.message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "skipping message"
                );
            }
            Err(e) => return Err(e),
        }
        ctx.commit(&message).await?;
    }
}
