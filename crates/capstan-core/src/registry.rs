//! Explicit handler registry.
//!
//! Handlers are bound to (entity type, message type) pairs through the
//! [`HandlerRegistryBuilder`] at process start — there is no runtime
//! discovery. Each binding carries a priority; lookups return handlers
//! sorted ascending by priority, with registration order breaking ties.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::aggregate::{Aggregate, AggregateState};
use crate::command::Command;
use crate::error::EngineError;
use crate::event::{DomainEvent, EventMeta};

/// Constructs a fresh, typed aggregate state for one entity type.
pub type StateFactory = Arc<dyn Fn() -> Box<dyn AggregateState> + Send + Sync>;

/// A command handler bound to one (entity type, command type) pair.
///
/// Handlers run on the entity's lane with exclusive access to the loaded
/// aggregate. They may await nested asynchronous work; the pipeline does
/// not proceed until the returned future completes.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Executes the command against the aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the command pipeline before commit.
    async fn handle(
        &self,
        aggregate: &mut Aggregate,
        command: &dyn Command,
    ) -> Result<(), EngineError>;
}

type AggregateEventHandlerFn =
    Arc<dyn Fn(&mut dyn AggregateState, &dyn DomainEvent) -> Result<(), EngineError> + Send + Sync>;

type EventListenerFn =
    Arc<dyn Fn(&dyn DomainEvent, &EventMeta) -> Result<(), EngineError> + Send + Sync>;

/// A registered command handler with its declared priority.
pub struct RegisteredCommandHandler {
    /// Declared priority; lower runs first.
    pub priority: i32,
    /// The handler itself.
    pub handler: Arc<dyn CommandHandler>,
}

/// A registered in-aggregate event handler with its declared priority.
pub struct RegisteredAggregateEventHandler {
    /// Declared priority; lower runs first.
    pub priority: i32,
    pub(crate) handler: AggregateEventHandlerFn,
}

impl RegisteredAggregateEventHandler {
    /// Invokes the handler against the aggregate's typed state.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error; the caller decides whether to
    /// isolate it.
    pub fn invoke(
        &self,
        state: &mut dyn AggregateState,
        event: &dyn DomainEvent,
    ) -> Result<(), EngineError> {
        (self.handler)(state, event)
    }
}

/// A registered event-bus listener with its declared priority.
pub struct RegisteredEventListener {
    /// Declared priority; lower runs first.
    pub priority: i32,
    pub(crate) listener: EventListenerFn,
}

impl RegisteredEventListener {
    /// Invokes the listener.
    ///
    /// # Errors
    ///
    /// Propagates the listener's error; the event bus isolates it.
    pub fn invoke(&self, event: &dyn DomainEvent, meta: &EventMeta) -> Result<(), EngineError> {
        (self.listener)(event, meta)
    }
}

/// Immutable, statically built registry of aggregate factories and
/// handlers, shared across the engine.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<&'static str, StateFactory>,
    command_handlers: HashMap<(&'static str, TypeId), Vec<RegisteredCommandHandler>>,
    aggregate_event_handlers: HashMap<(&'static str, TypeId), Vec<RegisteredAggregateEventHandler>>,
    event_listeners: HashMap<TypeId, Vec<RegisteredEventListener>>,
}

impl HandlerRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            registry: HandlerRegistry::default(),
        }
    }

    /// Builds the zero-version typed state for an entity type, or `None`
    /// when no factory is registered for it.
    #[must_use]
    pub fn new_state(&self, entity_type: &'static str) -> Option<Box<dyn AggregateState>> {
        self.factories
            .get(entity_type)
            .map(|factory| factory.as_ref()())
    }

    /// Returns the command handlers for (entity type, command type),
    /// sorted by priority. Empty when none are registered.
    #[must_use]
    pub fn command_handlers(
        &self,
        entity_type: &'static str,
        command_type: TypeId,
    ) -> &[RegisteredCommandHandler] {
        self.command_handlers
            .get(&(entity_type, command_type))
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the in-aggregate event handlers for (entity type, event
    /// type), sorted by priority.
    #[must_use]
    pub fn aggregate_event_handlers(
        &self,
        entity_type: &'static str,
        event_type: TypeId,
    ) -> &[RegisteredAggregateEventHandler] {
        self.aggregate_event_handlers
            .get(&(entity_type, event_type))
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the event-bus listeners for an event type, sorted by
    /// priority.
    #[must_use]
    pub fn event_listeners(&self, event_type: TypeId) -> &[RegisteredEventListener] {
        self.event_listeners
            .get(&event_type)
            .map_or(&[], Vec::as_slice)
    }
}

/// Builder for [`HandlerRegistry`].
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Registers the state factory for an entity type.
    ///
    /// The factory produces the zero-version state a fresh aggregate
    /// starts from before any events are replayed.
    #[must_use]
    pub fn aggregate<S, F>(mut self, entity_type: &'static str, factory: F) -> Self
    where
        S: AggregateState,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.registry
            .factories
            .insert(entity_type, Arc::new(move || Box::new(factory())));
        self
    }

    /// Registers a command handler for (entity type, command type `C`).
    #[must_use]
    pub fn command_handler<C: Command>(
        mut self,
        entity_type: &'static str,
        priority: i32,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        self.registry
            .command_handlers
            .entry((entity_type, TypeId::of::<C>()))
            .or_default()
            .push(RegisteredCommandHandler { priority, handler });
        self
    }

    /// Registers a synchronous in-aggregate event handler for (entity type,
    /// event type `E`). The handler folds the event into the entity's
    /// typed state `S` during both live application and hydration replay.
    #[must_use]
    pub fn aggregate_event_handler<S, E, F>(
        mut self,
        entity_type: &'static str,
        priority: i32,
        handler: F,
    ) -> Self
    where
        S: AggregateState,
        E: DomainEvent,
        F: Fn(&mut S, &E) -> Result<(), EngineError> + Send + Sync + 'static,
    {
        let erased: AggregateEventHandlerFn =
            Arc::new(move |state: &mut dyn AggregateState, event: &dyn DomainEvent| {
                let state = state
                    .as_any_mut()
                    .downcast_mut::<S>()
                    .ok_or_else(|| EngineError::Handler("aggregate state type mismatch".into()))?;
                let event = event
                    .downcast_ref::<E>()
                    .ok_or_else(|| EngineError::Handler("event type mismatch".into()))?;
                handler(state, event)
            });
        self.registry
            .aggregate_event_handlers
            .entry((entity_type, TypeId::of::<E>()))
            .or_default()
            .push(RegisteredAggregateEventHandler {
                priority,
                handler: erased,
            });
        self
    }

    /// Registers an event-bus listener for event type `E`.
    #[must_use]
    pub fn event_listener<E, F>(mut self, priority: i32, listener: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&E, &EventMeta) -> Result<(), EngineError> + Send + Sync + 'static,
    {
        let erased: EventListenerFn = Arc::new(move |event: &dyn DomainEvent, meta: &EventMeta| {
            let event = event
                .downcast_ref::<E>()
                .ok_or_else(|| EngineError::Handler("event type mismatch".into()))?;
            listener(event, meta)
        });
        self.registry
            .event_listeners
            .entry(TypeId::of::<E>())
            .or_default()
            .push(RegisteredEventListener {
                priority,
                listener: erased,
            });
        self
    }

    /// Finalizes the registry, sorting every handler list by priority.
    ///
    /// Sorting is stable, so handlers with equal priority keep their
    /// registration order.
    #[must_use]
    pub fn build(mut self) -> HandlerRegistry {
        for handlers in self.registry.command_handlers.values_mut() {
            handlers.sort_by_key(|handler| handler.priority);
        }
        for handlers in self.registry.aggregate_event_handlers.values_mut() {
            handlers.sort_by_key(|handler| handler.priority);
        }
        for listeners in self.registry.event_listeners.values_mut() {
            listeners.sort_by_key(|listener| listener.priority);
        }
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use std::any::{Any, TypeId};
    use std::sync::{Arc, Mutex};

    use super::HandlerRegistry;
    use crate::error::EngineError;
    use crate::event::{DomainEvent, EventMeta};
    use crate::id::EntityId;

    #[derive(Debug, Default)]
    struct Ledger {
        entries: u32,
    }

    #[derive(Debug)]
    struct EntryPosted;

    impl DomainEvent for EntryPosted {
        fn event_type(&self) -> &'static str {
            "entry_posted"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn listeners_are_sorted_by_priority_with_stable_ties() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (late, first, second) = (order.clone(), order.clone(), order.clone());

        let registry = HandlerRegistry::builder()
            .event_listener::<EntryPosted, _>(10, move |_, _| {
                late.lock().unwrap().push("late");
                Ok(())
            })
            .event_listener::<EntryPosted, _>(0, move |_, _| {
                first.lock().unwrap().push("first");
                Ok(())
            })
            .event_listener::<EntryPosted, _>(0, move |_, _| {
                second.lock().unwrap().push("second");
                Ok(())
            })
            .build();

        let meta = EventMeta {
            entity_id: EntityId::generate("ledger"),
            version: 0,
            occurred_at: chrono::Utc::now(),
        };
        for listener in registry.event_listeners(TypeId::of::<EntryPosted>()) {
            listener.invoke(&EntryPosted, &meta).unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "late"]);
    }

    #[test]
    fn aggregate_event_handler_folds_into_typed_state() {
        let registry = HandlerRegistry::builder()
            .aggregate::<Ledger, _>("ledger", Ledger::default)
            .aggregate_event_handler::<Ledger, EntryPosted, _>("ledger", 0, |ledger, _| {
                ledger.entries += 1;
                Ok(())
            })
            .build();

        let mut state = registry.new_state("ledger").unwrap();
        let handlers = registry.aggregate_event_handlers("ledger", TypeId::of::<EntryPosted>());
        assert_eq!(handlers.len(), 1);
        handlers[0].invoke(state.as_mut(), &EntryPosted).unwrap();

        let ledger = state.as_ref().as_any().downcast_ref::<Ledger>().unwrap();
        assert_eq!(ledger.entries, 1);
    }

    #[test]
    fn unregistered_lookups_return_empty_slices() {
        let registry = HandlerRegistry::builder().build();
        assert!(
            registry
                .command_handlers("ledger", TypeId::of::<EntryPosted>())
                .is_empty()
        );
        assert!(
            registry
                .event_listeners(TypeId::of::<EntryPosted>())
                .is_empty()
        );
    }

    #[test]
    fn mismatched_event_type_is_a_handler_error() {
        let registry = HandlerRegistry::builder()
            .aggregate_event_handler::<Ledger, EntryPosted, _>("ledger", 0, |_, _| Ok(()))
            .build();

        #[derive(Debug)]
        struct Other;
        impl DomainEvent for Other {
            fn event_type(&self) -> &'static str {
                "other"
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let mut state = Ledger::default();
        let handlers = registry.aggregate_event_handlers("ledger", TypeId::of::<EntryPosted>());
        let result = handlers[0].invoke(&mut state, &Other);
        assert!(matches!(result, Err(EngineError::Handler(_))));
    }
}
