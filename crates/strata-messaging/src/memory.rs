//! In-process partitioned log.
//!
//! [`MemoryLog`] keeps topics, partitions and consumer-group offsets in
//! memory and implements every broker trait, so a whole publish/consume
//! pipeline can run inside one process. Members of a consumer group share one
//! fetch cursor per partition; a reader that joins a group resumes from the
//! group's committed offsets, so anything fetched but never committed is
//! delivered again.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::broker::{
    ConsumedMessage, LogAdmin, LogBroker, LogMessage, LogReader, LogWriter, RequiredAcks,
    TopicConfig,
};
use crate::cancel::CancelScope;
use crate::error::BrokerError;

/// Partitions given to topics created implicitly by a write.
pub const DEFAULT_PARTITIONS: u32 = 1;

#[derive(Debug)]
struct Topic {
    partitions: Vec<Vec<LogMessage>>,
    replication_factor: u16,
    next_partition: usize,
}

impl Topic {
    fn new(partitions: u32, replication_factor: u16) -> Self {
        let count = usize::try_from(partitions.max(1)).unwrap_or(1);
        Self {
            partitions: vec![Vec::new(); count],
            replication_factor,
            next_partition: 0,
        }
    }

    /// Keyed messages hash to a fixed partition; unkeyed ones round-robin.
    fn select_partition(&mut self, key: Option<&[u8]>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                usize::try_from(hasher.finish() % count as u64).unwrap_or(0)
            }
            None => {
                let partition = self.next_partition % count;
                self.next_partition = self.next_partition.wrapping_add(1);
                partition
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    next: u64,
    committed: u64,
}

/// (group, topic, partition)
type CursorKey = (String, String, u32);

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    cursors: HashMap<CursorKey, Cursor>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    changed: watch::Sender<u64>,
    default_partitions: u32,
}

/// An in-memory partitioned log with consumer-group semantics.
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    /// Creates an empty log whose implicitly created topics get
    /// [`DEFAULT_PARTITIONS`] partitions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates an empty log whose implicitly created topics get `partitions`
    /// partitions.
    #[must_use]
    pub fn with_default_partitions(partitions: u32) -> Self {
        let (changed, _rx) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                changed,
                default_partitions: partitions.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.shared
            .changed
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Stops accepting writes. Readers still drain what was written and then
    /// fail with `BrokerError::Closed` instead of waiting.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify();
    }

    /// Returns every message of `topic`, ordered by partition then offset.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<ConsumedMessage> {
        let state = self.lock();
        let Some(topic) = state.topics.get(topic) else {
            return Vec::new();
        };
        topic
            .partitions
            .iter()
            .zip(0u32..)
            .flat_map(|(messages, partition)| {
                messages
                    .iter()
                    .zip(0u64..)
                    .map(move |(message, offset)| ConsumedMessage {
                        partition,
                        offset,
                        message: message.clone(),
                    })
            })
            .collect()
    }

    /// Returns the definition of an existing topic.
    #[must_use]
    pub fn topic(&self, name: &str) -> Option<TopicConfig> {
        self.lock().topics.get(name).map(|topic| TopicConfig {
            name: name.to_owned(),
            partitions: u32::try_from(topic.partitions.len()).unwrap_or(u32::MAX),
            replication_factor: topic.replication_factor,
        })
    }

    /// Returns the next offset `group_id` will resume from on `partition`.
    #[must_use]
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: u32) -> u64 {
        self.lock()
            .cursors
            .get(&(group_id.to_owned(), topic.to_owned(), partition))
            .map_or(0, |cursor| cursor.committed)
    }

    /// Joins `group_id` with a new reader subscribed to `topics`.
    #[must_use]
    pub fn group_reader(&self, group_id: &str, topics: &[String]) -> MemoryReader {
        {
            let mut state = self.lock();
            for ((group, topic, _), cursor) in &mut state.cursors {
                if group == group_id && topics.contains(topic) {
                    cursor.next = cursor.committed;
                }
            }
        }
        debug!(group_id, ?topics, "reader joined group");
        MemoryReader {
            log: self.clone(),
            group_id: group_id.to_owned(),
            topics: topics.to_vec(),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogWriter for MemoryLog {
    async fn write_messages(
        &self,
        messages: &[LogMessage],
        _acks: RequiredAcks,
    ) -> Result<(), BrokerError> {
        if let Some(message) = messages.iter().find(|m| m.topic.is_empty()) {
            return Err(BrokerError::InvalidMessage(format!(
                "message without topic ({} bytes)",
                message.value.len()
            )));
        }

        {
            let mut state = self.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            for message in messages {
                let topic = state
                    .topics
                    .entry(message.topic.clone())
                    .or_insert_with(|| Topic::new(self.shared.default_partitions, 1));
                let partition = topic.select_partition(message.key.as_deref());
                topic.partitions[partition].push(message.clone());
            }
        }
        self.notify();
        Ok(())
    }
}

#[async_trait]
impl LogAdmin for MemoryLog {
    async fn create_topics(&self, topics: &[TopicConfig]) -> Result<(), BrokerError> {
        if let Some(invalid) = topics
            .iter()
            .find(|t| t.name.is_empty() || t.partitions == 0 || t.replication_factor == 0)
        {
            return Err(BrokerError::InvalidMessage(format!(
                "invalid topic definition {invalid:?}"
            )));
        }

        let mut state = self.lock();
        for topic in topics {
            state
                .topics
                .entry(topic.name.clone())
                .or_insert_with(|| Topic::new(topic.partitions, topic.replication_factor));
        }
        Ok(())
    }
}

impl LogBroker for MemoryLog {
    fn writer(&self) -> Arc<dyn LogWriter> {
        Arc::new(self.clone())
    }

    fn reader(&self, group_id: &str, topics: &[String]) -> Result<Arc<dyn LogReader>, BrokerError> {
        if group_id.is_empty() {
            return Err(BrokerError::InvalidMessage("empty consumer group id".into()));
        }
        Ok(Arc::new(self.group_reader(group_id, topics)))
    }

    fn admin(&self) -> Arc<dyn LogAdmin> {
        Arc::new(self.clone())
    }
}

/// One consumer-group member reading from a [`MemoryLog`].
#[derive(Debug)]
pub struct MemoryReader {
    log: MemoryLog,
    group_id: String,
    topics: Vec<String>,
    closed: AtomicBool,
}

impl MemoryReader {
    fn try_next(&self, state: &mut State) -> Option<ConsumedMessage> {
        let State {
            topics, cursors, ..
        } = state;
        for name in &self.topics {
            let Some(topic) = topics.get(name) else {
                continue;
            };
            for (messages, partition) in topic.partitions.iter().zip(0u32..) {
                let cursor = cursors
                    .entry((self.group_id.clone(), name.clone(), partition))
                    .or_default();
                let offset = cursor.next;
                let Some(message) = usize::try_from(offset).ok().and_then(|i| messages.get(i))
                else {
                    continue;
                };
                cursor.next += 1;
                return Some(ConsumedMessage {
                    partition,
                    offset,
                    message: message.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl LogReader for MemoryReader {
    async fn fetch_message(&self, cancel: &CancelScope) -> Result<ConsumedMessage, BrokerError> {
        let mut changed = self.log.shared.changed.subscribe();
        loop {
            changed.mark_unchanged();
            if cancel.is_cancelled() {
                return Err(BrokerError::Cancelled);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }
            {
                let mut state = self.log.lock();
                if let Some(message) = self.try_next(&mut state) {
                    return Ok(message);
                }
                if state.closed {
                    return Err(BrokerError::Closed);
                }
            }

            tokio::select! {
                result = changed.changed() => {
                    if result.is_err() {
                        return Err(BrokerError::Closed);
                    }
                }
                () = cancel.cancelled() => return Err(BrokerError::Cancelled),
            }
        }
    }

    async fn commit_messages(&self, messages: &[ConsumedMessage]) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let mut state = self.log.lock();
        for consumed in messages {
            let cursor = state
                .cursors
                .entry((
                    self.group_id.clone(),
                    consumed.message.topic.clone(),
                    consumed.partition,
                ))
                .or_default();
            cursor.committed = cursor.committed.max(consumed.offset + 1);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        self.log.notify();
        Ok(())
    }
}
