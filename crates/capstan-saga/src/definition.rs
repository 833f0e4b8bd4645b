//! Saga state-machine definitions.
//!
//! Each saga type declares its transitions as an explicit, statically
//! built list of [`TransitionBinding`]s: (source state, event type) pairs
//! bound to a handler that runs user logic and returns the next state.
//! The engine consults the declared order; the first binding satisfied by
//! an incoming event wins.

use std::any::TypeId;
use std::sync::Arc;

use capstan_core::error::EngineError;
use capstan_core::event::{DomainEvent, EventMeta};

use crate::saga::{Saga, SagaData};
use crate::timeout::TimeoutStrategy;

/// The implicit initial state a saga occupies before any snapshot exists.
/// Bindings declared on this state create new saga instances.
pub const START_STATE: &str = "START";

/// The terminal state. It has no outgoing transitions and is never live;
/// a saga transitioning here is deleted from the store.
pub const END_STATE: &str = "END";

type TransitionFn = Arc<
    dyn Fn(&mut Saga, &EventMeta, &dyn DomainEvent) -> Result<&'static str, EngineError>
        + Send
        + Sync,
>;

/// One edge of a saga's state machine.
pub struct TransitionBinding {
    state: &'static str,
    event_type: TypeId,
    handler: TransitionFn,
}

impl TransitionBinding {
    /// Declares a transition out of `state` taken when an event of type
    /// `E` arrives. The handler runs user logic against the saga, may
    /// mutate its field data, may queue one outgoing command, and returns
    /// the name of the new state.
    #[must_use]
    pub fn new<E, F>(state: &'static str, handler: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&mut Saga, &EventMeta, &E) -> Result<&'static str, EngineError>
            + Send
            + Sync
            + 'static,
    {
        let erased: TransitionFn =
            Arc::new(move |saga: &mut Saga, meta: &EventMeta, event: &dyn DomainEvent| {
                let event = event
                    .downcast_ref::<E>()
                    .ok_or_else(|| EngineError::Handler("event type mismatch".into()))?;
                handler(saga, meta, event)
            });
        Self {
            state,
            event_type: TypeId::of::<E>(),
            handler: erased,
        }
    }

    /// Returns the source state this binding leaves from.
    #[must_use]
    pub fn state(&self) -> &'static str {
        self.state
    }

    /// Returns whether this binding matches (source state, event type).
    #[must_use]
    pub fn matches(&self, state: &str, event_type: TypeId) -> bool {
        self.state == state && self.event_type == event_type
    }

    /// Returns whether this binding is taken by events of the given type.
    #[must_use]
    pub fn handles_event(&self, event_type: TypeId) -> bool {
        self.event_type == event_type
    }

    /// Runs the bound handler.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error to the engine's caller for this
    /// event.
    pub fn invoke(
        &self,
        saga: &mut Saga,
        meta: &EventMeta,
        event: &dyn DomainEvent,
    ) -> Result<&'static str, EngineError> {
        (self.handler)(saga, meta, event)
    }
}

impl std::fmt::Debug for TransitionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionBinding")
            .field("state", &self.state)
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

/// Static definition of one saga type: its name, expiry policy, typed
/// field-data codec, and transition table.
pub trait SagaDefinition: Send + Sync {
    /// Returns the stable saga type name used in persisted records.
    fn saga_type(&self) -> &'static str;

    /// Returns the expiry policy for instances of this saga type.
    fn timeout_strategy(&self) -> TimeoutStrategy;

    /// Constructs the field data a fresh instance starts with.
    fn new_data(&self) -> Box<dyn SagaData>;

    /// Rebuilds typed field data from its persisted form.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Codec`] when the stored value does not
    /// deserialize into this saga type's schema.
    fn hydrate_data(&self, value: &serde_json::Value) -> Result<Box<dyn SagaData>, EngineError>;

    /// Returns the transition table in declared order.
    fn bindings(&self) -> &[TransitionBinding];

    /// Returns whether `state` has at least one outgoing transition.
    /// [`END_STATE`] never does.
    fn has_outgoing(&self, state: &str) -> bool {
        state != END_STATE && self.bindings().iter().any(|binding| binding.state == state)
    }

    /// Returns the first binding out of `state` for an event type, per
    /// declared order.
    fn binding_for(&self, state: &str, event_type: TypeId) -> Option<&TransitionBinding> {
        self.bindings()
            .iter()
            .find(|binding| binding.matches(state, event_type))
    }
}
