//! Aggregate loading and committing.

use std::sync::Arc;

use capstan_core::aggregate::Aggregate;
use capstan_core::clock::Clock;
use capstan_core::error::EngineError;
use capstan_core::id::EntityId;
use capstan_core::registry::HandlerRegistry;
use capstan_core::repository::EventRepository;

use crate::event_bus::EventBus;

/// Loads aggregates by replaying their event streams and commits their
/// buffered events.
pub struct ObjectRepository {
    event_repository: Arc<dyn EventRepository>,
    event_bus: Arc<EventBus>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
}

impl ObjectRepository {
    /// Creates a repository over the given store, bus, and registry.
    #[must_use]
    pub fn new(
        event_repository: Arc<dyn EventRepository>,
        event_bus: Arc<EventBus>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            event_repository,
            event_bus,
            registry,
            clock,
        }
    }

    /// Loads the aggregate for `entity_id` by folding its stored event
    /// stream into a fresh instance. An empty stream yields a fresh
    /// instance at version −1.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownEntityType`] when no state factory is
    /// registered for the id's entity type, or a store error from the
    /// stream load.
    pub async fn retrieve(&self, entity_id: EntityId) -> Result<Aggregate, EngineError> {
        let state = self
            .registry
            .new_state(entity_id.entity_type())
            .ok_or(EngineError::UnknownEntityType(entity_id.entity_type()))?;

        let mut aggregate = Aggregate::new(
            entity_id,
            state,
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
        );
        for message in self.event_repository.retrieve(&entity_id).await? {
            aggregate.replay(&message);
        }
        Ok(aggregate)
    }

    /// Commits the aggregate's buffered events: appends them to the event
    /// store, publishes them on the event bus, and clears the buffer —
    /// strictly in that order, each step gated on the previous one.
    ///
    /// On append failure the buffer is retained so the caller may retry.
    /// On publication failure the events are already durably stored but
    /// the buffer stays un-cleared: this is the engine's recognized
    /// at-least-once window, and downstream listeners must tolerate
    /// redelivery.
    ///
    /// # Errors
    ///
    /// Returns the append error, [`EngineError::VersionConflict`] when
    /// another writer advanced the stream, or
    /// [`EngineError::PublicationFailed`] for the post-append fan-out
    /// failure.
    pub async fn save(&self, aggregate: &mut Aggregate) -> Result<(), EngineError> {
        if aggregate.uncommitted().is_empty() {
            return Ok(());
        }

        // The buffer's versions are consecutive, so the stream is expected
        // to end just before the first buffered message.
        let expected_version = aggregate.uncommitted()[0].meta.version - 1;
        self.event_repository
            .append(aggregate.uncommitted(), expected_version)
            .await?;

        if self.event_bus.publish(aggregate.uncommitted()).await {
            aggregate.mark_saved();
            Ok(())
        } else {
            Err(EngineError::PublicationFailed(aggregate.id()))
        }
    }
}
