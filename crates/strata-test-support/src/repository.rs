//! In-memory `EventRepository` with transaction accounting and fault
//! injection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use strata_core::error::DomainError;
use strata_core::event::Event;
use strata_core::repository::{EventRepository, RepositoryTransaction};
use strata_core::snapshot::Snapshot;

/// A repository operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `EventRepository::begin`.
    Begin,
    /// `RepositoryTransaction::append_events`.
    Append,
    /// `RepositoryTransaction::upsert_snapshot`.
    UpsertSnapshot,
    /// `RepositoryTransaction::commit`.
    Commit,
    /// `EventRepository::load_events`.
    LoadEvents,
    /// `EventRepository::load_snapshot`.
    LoadSnapshot,
}

/// How many write scopes were opened and how each one ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Scopes opened.
    pub begun: usize,
    /// Scopes committed.
    pub committed: usize,
    /// Scopes rolled back, explicitly or by drop.
    pub rolled_back: usize,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    snapshots: HashMap<String, Snapshot>,
    stats: TransactionStats,
    reads: usize,
    faults: HashSet<Fault>,
}

impl State {
    fn check(&self, fault: Fault) -> Result<(), DomainError> {
        if self.faults.contains(&fault) {
            return Err(DomainError::Storage(format!("injected {fault:?} failure")));
        }
        Ok(())
    }

    fn is_taken(&self, aggregate_id: &str, version: u64) -> bool {
        self.events
            .iter()
            .any(|e| e.aggregate_id == aggregate_id && e.version == version)
    }
}

/// An event repository held entirely in memory.
///
/// Writes become visible only on commit; a transaction dropped without
/// commit counts as rolled back. `(aggregate_id, version)` is unique, as in
/// the `PostgreSQL` schema.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventRepository {
    state: Arc<Mutex<State>>,
}

impl MemoryEventRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes `fault` fail until cleared.
    pub fn fail_on(&self, fault: Fault) {
        self.lock().faults.insert(fault);
    }

    /// Stops injecting `fault`.
    pub fn clear_fault(&self, fault: Fault) {
        self.lock().faults.remove(&fault);
    }

    /// Seeds committed events without going through a transaction.
    pub fn seed_events(&self, events: impl IntoIterator<Item = Event>) {
        self.lock().events.extend(events);
    }

    /// Seeds a committed snapshot.
    pub fn seed_snapshot(&self, snapshot: Snapshot) {
        self.lock()
            .snapshots
            .insert(snapshot.aggregate_id.clone(), snapshot);
    }

    /// Returns the committed events of one aggregate, ordered by version.
    #[must_use]
    pub fn events(&self, aggregate_id: &str) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .lock()
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        events
    }

    /// Returns the committed snapshot of one aggregate.
    #[must_use]
    pub fn snapshot(&self, aggregate_id: &str) -> Option<Snapshot> {
        self.lock().snapshots.get(aggregate_id).cloned()
    }

    /// Returns transaction accounting.
    #[must_use]
    pub fn stats(&self) -> TransactionStats {
        self.lock().stats
    }

    /// Returns the number of read calls (`load_events`, `load_snapshot`,
    /// `exists`) served so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.lock().reads
    }
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn load_events(
        &self,
        aggregate_id: &str,
        after_version: u64,
    ) -> Result<Vec<Event>, DomainError> {
        {
            let mut state = self.lock();
            state.reads += 1;
            state.check(Fault::LoadEvents)?;
        }
        Ok(self
            .events(aggregate_id)
            .into_iter()
            .filter(|e| e.version > after_version)
            .collect())
    }

    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Snapshot, DomainError> {
        let mut state = self.lock();
        state.reads += 1;
        state.check(Fault::LoadSnapshot)?;
        state
            .snapshots
            .get(aggregate_id)
            .cloned()
            .ok_or_else(|| DomainError::SnapshotNotFound(aggregate_id.to_owned()))
    }

    async fn exists(&self, aggregate_id: &str) -> Result<bool, DomainError> {
        let mut state = self.lock();
        state.reads += 1;
        Ok(state.events.iter().any(|e| e.aggregate_id == aggregate_id))
    }

    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>, DomainError> {
        let mut state = self.lock();
        state.check(Fault::Begin)?;
        state.stats.begun += 1;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            events: Vec::new(),
            snapshots: Vec::new(),
            finished: false,
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    events: Vec<Event>,
    snapshots: Vec<Snapshot>,
    finished: bool,
}

impl MemoryTransaction {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn conflict(&self, state: &State) -> Option<DomainError> {
        self.events.iter().enumerate().find_map(|(i, e)| {
            let staged_twice = self.events[..i]
                .iter()
                .any(|p| p.aggregate_id == e.aggregate_id && p.version == e.version);
            (staged_twice || state.is_taken(&e.aggregate_id, e.version)).then(|| {
                DomainError::ConcurrencyConflict {
                    aggregate_id: e.aggregate_id.clone(),
                    version: e.version,
                }
            })
        })
    }
}

#[async_trait]
impl RepositoryTransaction for MemoryTransaction {
    async fn append_events(&mut self, events: &[Event]) -> Result<(), DomainError> {
        self.lock().check(Fault::Append)?;
        self.events.extend_from_slice(events);
        let state = self.lock();
        match self.conflict(&state) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn upsert_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), DomainError> {
        self.lock().check(Fault::UpsertSnapshot)?;
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DomainError> {
        let state_handle = Arc::clone(&self.state);
        let mut state = state_handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.finished = true;

        let failure = state
            .check(Fault::Commit)
            .err()
            .or_else(|| self.conflict(&state));
        if let Some(err) = failure {
            state.stats.rolled_back += 1;
            return Err(err);
        }

        state.events.append(&mut self.events);
        for snapshot in self.snapshots.drain(..) {
            state
                .snapshots
                .insert(snapshot.aggregate_id.clone(), snapshot);
        }
        state.stats.committed += 1;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DomainError> {
        self.finished = true;
        self.lock().stats.rolled_back += 1;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.lock().stats.rolled_back += 1;
        }
    }
}
