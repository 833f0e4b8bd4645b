//! Event-sourced aggregate.

use std::any::Any;
use std::sync::Arc;

use crate::clock::Clock;
use crate::event::{DomainEvent, EventMessage, EventMeta};
use crate::id::EntityId;
use crate::registry::HandlerRegistry;

/// Typed, entity-specific state held inside an [`Aggregate`].
///
/// Implemented automatically for any `Any + Send + Sync + Debug` type, so
/// a plain struct with the entity's fields is enough.
pub trait AggregateState: Any + Send + Sync + std::fmt::Debug {
    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns `self` as mutable [`Any`] for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Sync + std::fmt::Debug> AggregateState for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An event-sourced entity instance.
///
/// Current state is derived by folding the entity's ordered event history
/// through the registered aggregate-event handlers. Newly produced events
/// are buffered until the repository commits them; the version reflects
/// the last event applied or replayed, starting at −1 for an entity with
/// no events yet.
pub struct Aggregate {
    id: EntityId,
    version: i64,
    uncommitted: Vec<EventMessage>,
    state: Box<dyn AggregateState>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
}

impl Aggregate {
    /// Creates a fresh aggregate with no event history.
    #[must_use]
    pub fn new(
        id: EntityId,
        state: Box<dyn AggregateState>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            version: -1,
            uncommitted: Vec::new(),
            state,
            registry,
            clock,
        }
    }

    /// Returns the entity identifier.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the version of the last event applied or replayed, or −1
    /// when the entity has no events yet.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Applies a new event: buffers it at version `previous + 1` with the
    /// current wall-clock time, then synchronously dispatches it to the
    /// entity's registered event handlers so in-process invariants react
    /// immediately.
    ///
    /// A handler failure is logged and neither rolls back the buffered
    /// event nor stops the remaining handlers.
    pub fn apply<E: DomainEvent>(&mut self, event: E) {
        let message = EventMessage {
            meta: EventMeta {
                entity_id: self.id,
                version: self.version + 1,
                occurred_at: self.clock.now(),
            },
            event: Arc::new(event),
        };
        self.uncommitted.push(message.clone());
        self.dispatch(&message);
    }

    /// Re-applies a committed event during hydration: dispatches without
    /// buffering and advances the version to the replayed message's.
    pub fn replay(&mut self, message: &EventMessage) {
        self.dispatch(message);
    }

    fn dispatch(&mut self, message: &EventMessage) {
        let registry = Arc::clone(&self.registry);
        let handlers = registry
            .aggregate_event_handlers(self.id.entity_type(), message.event.concrete_type_id());
        for handler in handlers {
            if let Err(error) = handler.invoke(self.state.as_mut(), message.event.as_ref()) {
                tracing::warn!(
                    entity_id = %self.id,
                    event_type = message.event.event_type(),
                    %error,
                    "aggregate event handler failed"
                );
            }
        }
        self.version = message.meta.version;
    }

    /// Returns the buffered, not-yet-committed event messages in
    /// application order.
    #[must_use]
    pub fn uncommitted(&self) -> &[EventMessage] {
        &self.uncommitted
    }

    /// Clears the uncommitted buffer. Called by the repository only after
    /// a successful commit and publication.
    pub fn mark_saved(&mut self) {
        self.uncommitted.clear();
    }

    /// Returns the entity's typed state, or `None` on a type mismatch.
    #[must_use]
    pub fn state<S: AggregateState>(&self) -> Option<&S> {
        self.state.as_ref().as_any().downcast_ref::<S>()
    }

    /// Returns the entity's typed state mutably, or `None` on a type
    /// mismatch.
    #[must_use]
    pub fn state_mut<S: AggregateState>(&mut self) -> Option<&mut S> {
        self.state.as_mut().as_any_mut().downcast_mut::<S>()
    }
}

impl std::fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("uncommitted", &self.uncommitted.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
