//! Event-type to decoder registry.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::DomainError;
use crate::event::Event;

type Decoder<E> = Box<dyn Fn(&[u8]) -> Result<E, serde_json::Error> + Send + Sync>;

/// Maps persisted `event_type` names to typed decoders for one event enum.
///
/// ```
/// use serde::Deserialize;
/// use strata_core::codec::EventRegistry;
///
/// #[derive(Debug, Deserialize)]
/// struct Opened { owner: String }
///
/// #[derive(Debug)]
/// enum AccountEvent { Opened(Opened) }
///
/// let registry = EventRegistry::new().register("AccountOpened", AccountEvent::Opened);
/// assert!(registry.contains("AccountOpened"));
/// ```
pub struct EventRegistry<E> {
    decoders: HashMap<&'static str, Decoder<E>>,
}

impl<E: 'static> EventRegistry<E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers the payload type `P` under `event_type`, wrapped into the
    /// event enum with `wrap`.
    #[must_use]
    pub fn register<P>(mut self, event_type: &'static str, wrap: fn(P) -> E) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        self.decoders.insert(
            event_type,
            Box::new(move |bytes: &[u8]| serde_json::from_slice::<P>(bytes).map(wrap)),
        );
        self
    }

    /// Returns true if a decoder is registered for `event_type`.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Decodes a persisted event into its typed form.
    ///
    /// # Errors
    ///
    /// - `DomainError::InvalidEvent` for a zero-value record.
    /// - `DomainError::InvalidEventType` if no decoder is registered.
    /// - `DomainError::Serialization` if the payload does not match the type.
    pub fn decode(&self, event: &Event) -> Result<E, DomainError> {
        if event.is_empty() {
            return Err(DomainError::InvalidEvent(format!(
                "empty event at version {} for aggregate {:?}",
                event.version, event.aggregate_id
            )));
        }

        let decoder = self
            .decoders
            .get(event.event_type.as_str())
            .ok_or_else(|| DomainError::InvalidEventType(event.event_type.clone()))?;

        decoder(&event.data).map_err(|e| {
            DomainError::Serialization(format!(
                "decode {} v{} for aggregate {}: {e}",
                event.event_type, event.version, event.aggregate_id
            ))
        })
    }
}

impl<E: 'static> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("EventRegistry")
            .field("event_types", &types)
            .finish()
    }
}
