//! Saga correlation and transition execution.

use std::sync::Arc;

use tokio::sync::mpsc;

use capstan_core::clock::Clock;
use capstan_core::command::Command;
use capstan_core::error::EngineError;
use capstan_core::event::EventMessage;
use capstan_saga::definition::{END_STATE, SagaDefinition, START_STATE, TransitionBinding};
use capstan_saga::saga::Saga;
use capstan_saga::store::{SagaRecord, SagaStore};

/// Finds or creates sagas for incoming events, runs the matching
/// transition, persists the saga, and hands queued outgoing commands to
/// the dispatcher after persistence succeeds.
pub struct SagaEngine {
    definitions: Vec<Arc<dyn SagaDefinition>>,
    saga_store: Arc<dyn SagaStore>,
    clock: Arc<dyn Clock>,
    outgoing: mpsc::UnboundedSender<Box<dyn Command>>,
}

impl SagaEngine {
    /// Creates a saga engine over the registered definitions.
    ///
    /// `outgoing` feeds the dedicated dispatcher worker; commands are only
    /// sent there after the saga they belong to has been persisted.
    #[must_use]
    pub fn new(
        definitions: Vec<Arc<dyn SagaDefinition>>,
        saga_store: Arc<dyn SagaStore>,
        clock: Arc<dyn Clock>,
        outgoing: mpsc::UnboundedSender<Box<dyn Command>>,
    ) -> Self {
        Self {
            definitions,
            saga_store,
            clock,
            outgoing,
        }
    }

    /// Routes one committed event message through every registered saga
    /// definition.
    ///
    /// For each definition, a `START` binding matching the event type
    /// creates a brand-new saga; non-`START` bindings run against the
    /// stored sagas associated with the event's entity whose state matches
    /// and which are still live. The association snapshot is taken before
    /// the `START` pass so a freshly created saga never re-handles the
    /// event that created it.
    ///
    /// # Errors
    ///
    /// Propagates transition-handler and store errors to the caller for
    /// this event. Sagas processed earlier in the pass keep their
    /// persisted transitions.
    pub async fn handle(&self, message: &EventMessage) -> Result<(), EngineError> {
        let event_type_id = message.event.concrete_type_id();

        for definition in &self.definitions {
            let wants_existing = definition.bindings().iter().any(|binding| {
                binding.state() != START_STATE && binding.handles_event(event_type_id)
            });

            let records = if wants_existing {
                self.saga_store
                    .find_associated_sagas(&message.meta.entity_id, definition.saga_type())
                    .await?
            } else {
                Vec::new()
            };

            if let Some(binding) = definition.binding_for(START_STATE, event_type_id) {
                let mut saga = Saga::start(Arc::clone(definition), self.clock.now());
                tracing::debug!(
                    saga_type = definition.saga_type(),
                    saga_id = %saga.saga_id(),
                    event_type = message.event.event_type(),
                    "starting saga"
                );
                self.run_transition(&mut saga, message, binding).await?;
            }

            for record in records {
                self.handle_existing(definition, record, message, event_type_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_existing(
        &self,
        definition: &Arc<dyn SagaDefinition>,
        record: SagaRecord,
        message: &EventMessage,
        event_type_id: std::any::TypeId,
    ) -> Result<(), EngineError> {
        let Some(binding) = definition.binding_for(&record.current_state, event_type_id) else {
            return Ok(());
        };
        let mut saga = Saga::rehydrate(Arc::clone(definition), record)?;
        if !saga.is_live(self.clock.now()) {
            // Expired or dead sagas are frozen: the event is ignored for
            // this instance, not an error.
            tracing::debug!(
                saga_type = definition.saga_type(),
                saga_id = %saga.saga_id(),
                event_type = message.event.event_type(),
                "skipping transition for non-live saga"
            );
            return Ok(());
        }
        self.run_transition(&mut saga, message, binding).await
    }

    async fn run_transition(
        &self,
        saga: &mut Saga,
        message: &EventMessage,
        binding: &TransitionBinding,
    ) -> Result<(), EngineError> {
        let new_state = binding.invoke(saga, &message.meta, message.event.as_ref())?;
        saga.record_transition(
            message.meta.entity_id,
            message.event.event_type(),
            new_state,
            self.clock.now(),
        );

        if saga.current_state() == END_STATE {
            self.saga_store.delete_saga(&saga.saga_id()).await?;
        } else {
            self.saga_store.store_saga(saga.to_record()?).await?;
        }

        // Only after the saga has been persisted may its queued command
        // leave the process; the dispatcher worker publishes it off the
        // event-handling critical path.
        if let Some(command) = saga.take_pending_command() {
            if self.outgoing.send(command).is_err() {
                tracing::warn!(
                    saga_id = %saga.saga_id(),
                    "command dispatcher is gone, dropping saga command"
                );
            }
        }
        Ok(())
    }
}
