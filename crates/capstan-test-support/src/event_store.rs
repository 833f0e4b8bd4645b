//! Test event stores — in-memory `EventRepository` implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use capstan_core::error::EngineError;
use capstan_core::event::EventMessage;
use capstan_core::id::EntityId;
use capstan_core::repository::EventRepository;

/// An event repository keeping one ordered stream per entity in memory,
/// with the optimistic expected-version check a durable store would
/// perform.
#[derive(Default)]
pub struct InMemoryEventRepository {
    streams: Mutex<HashMap<EntityId, Vec<EventMessage>>>,
}

impl InMemoryEventRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the stored stream for an entity, in commit
    /// order. Unknown entities yield an empty stream.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn stream(&self, entity_id: &EntityId) -> Vec<EventMessage> {
        self.streams
            .lock()
            .unwrap()
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of entities with at least one stored event.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn retrieve(&self, entity_id: &EntityId) -> Result<Vec<EventMessage>, EngineError> {
        Ok(self.stream(entity_id))
    }

    async fn append(
        &self,
        messages: &[EventMessage],
        expected_version: i64,
    ) -> Result<(), EngineError> {
        let Some(first) = messages.first() else {
            return Ok(());
        };
        let entity_id = first.entity_id();

        let mut streams = self.streams.lock().unwrap();
        let stream = streams.entry(entity_id).or_default();
        let stored_version = stream.last().map_or(-1, |message| message.meta.version);
        if stored_version != expected_version {
            return Err(EngineError::VersionConflict {
                entity_id,
                expected: expected_version,
                actual: stored_version,
            });
        }
        stream.extend_from_slice(messages);
        Ok(())
    }
}

/// An event repository that always fails, for error-path tests.
#[derive(Debug, Default)]
pub struct FailingEventRepository;

#[async_trait]
impl EventRepository for FailingEventRepository {
    async fn retrieve(&self, _entity_id: &EntityId) -> Result<Vec<EventMessage>, EngineError> {
        Err(EngineError::Store("connection refused".into()))
    }

    async fn append(
        &self,
        _messages: &[EventMessage],
        _expected_version: i64,
    ) -> Result<(), EngineError> {
        Err(EngineError::Store("connection refused".into()))
    }
}
