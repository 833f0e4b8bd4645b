//! Committed-event fan-out.

use std::sync::Arc;

use capstan_core::event::EventMessage;
use capstan_core::registry::HandlerRegistry;

use crate::saga_engine::SagaEngine;

/// Fans committed events out to registered listeners and forwards them to
/// the saga engine.
pub struct EventBus {
    registry: Arc<HandlerRegistry>,
    saga_engine: Arc<SagaEngine>,
}

impl EventBus {
    /// Creates an event bus over the registry's listeners.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, saga_engine: Arc<SagaEngine>) -> Self {
        Self {
            registry,
            saga_engine,
        }
    }

    /// Publishes committed messages in order.
    ///
    /// Listeners for each message run in priority order; a listener
    /// failure is logged and excluded, never stopping sibling listeners or
    /// later messages. After the listener fan-out each message is
    /// forwarded to the saga engine.
    ///
    /// Returns `true` unless an unrecoverable internal error occurred.
    /// Listener-level failures are isolated by design and do not flip the
    /// flag; saga persistence or transition failures do.
    pub async fn publish(&self, messages: &[EventMessage]) -> bool {
        let mut ok = true;
        for message in messages {
            for listener in self
                .registry
                .event_listeners(message.event.concrete_type_id())
            {
                if let Err(error) = listener.invoke(message.event.as_ref(), &message.meta) {
                    tracing::warn!(
                        entity_id = %message.entity_id(),
                        event_type = message.event.event_type(),
                        %error,
                        "event listener failed"
                    );
                }
            }

            if let Err(error) = self.saga_engine.handle(message).await {
                tracing::error!(
                    entity_id = %message.entity_id(),
                    event_type = message.event.event_type(),
                    %error,
                    "saga engine failed handling event"
                );
                ok = false;
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::{Arc, Mutex};

    use super::EventBus;
    use crate::saga_engine::SagaEngine;
    use capstan_core::clock::SystemClock;
    use capstan_core::error::EngineError;
    use capstan_core::event::{DomainEvent, EventMessage, EventMeta};
    use capstan_core::id::EntityId;
    use capstan_core::registry::HandlerRegistry;
    use capstan_test_support::InMemorySagaStore;

    #[derive(Debug)]
    struct AuditLogged;

    impl DomainEvent for AuditLogged {
        fn event_type(&self) -> &'static str {
            "audit_logged"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn bus_with(registry: HandlerRegistry) -> EventBus {
        let (outgoing_tx, _outgoing_rx) = tokio::sync::mpsc::unbounded_channel();
        let saga_engine = Arc::new(SagaEngine::new(
            Vec::new(),
            Arc::new(InMemorySagaStore::new()),
            Arc::new(SystemClock),
            outgoing_tx,
        ));
        EventBus::new(Arc::new(registry), saga_engine)
    }

    fn message_for(entity_id: EntityId) -> EventMessage {
        EventMessage {
            meta: EventMeta {
                entity_id,
                version: 0,
                occurred_at: chrono::Utc::now(),
            },
            event: Arc::new(AuditLogged),
        }
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_its_sibling_or_flip_the_result() {
        // Arrange
        let reached = Arc::new(Mutex::new(Vec::new()));
        let sibling = Arc::clone(&reached);
        let registry = HandlerRegistry::builder()
            .event_listener::<AuditLogged, _>(0, |_, _| {
                Err(EngineError::Handler("listener blew up".into()))
            })
            .event_listener::<AuditLogged, _>(1, move |_, meta| {
                sibling.lock().unwrap().push(meta.version);
                Ok(())
            })
            .build();
        let bus = bus_with(registry);

        // Act
        let ok = bus.publish(&[message_for(EntityId::generate("audit"))]).await;

        // Assert: the sibling ran and listener failure stayed isolated.
        assert!(ok);
        assert_eq!(*reached.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn later_messages_still_fan_out_after_a_listener_failure() {
        // Arrange
        let count = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&count);
        let registry = HandlerRegistry::builder()
            .event_listener::<AuditLogged, _>(0, move |_, _| {
                let mut count = counter.lock().unwrap();
                *count += 1;
                if *count == 1 {
                    return Err(EngineError::Handler("first delivery fails".into()));
                }
                Ok(())
            })
            .build();
        let bus = bus_with(registry);
        let entity_id = EntityId::generate("audit");

        // Act
        let ok = bus
            .publish(&[message_for(entity_id), message_for(entity_id)])
            .await;

        // Assert
        assert!(ok);
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn events_without_listeners_publish_cleanly() {
        let bus = bus_with(HandlerRegistry::builder().build());
        assert!(bus.publish(&[message_for(EntityId::generate("audit"))]).await);
    }
}
