//! Engine construction and wiring.
//!
//! Every collaborator is injected explicitly at construction time; there
//! is no global context or runtime lookup. The builder assembles the
//! pipeline in dependency order: saga engine, event bus, object
//! repository, scheduler, command bus, and finally the dispatcher worker
//! that feeds saga commands back into the bus.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use capstan_core::clock::{Clock, SystemClock};
use capstan_core::error::EngineError;
use capstan_core::registry::HandlerRegistry;
use capstan_core::repository::EventRepository;
use capstan_saga::definition::SagaDefinition;
use capstan_saga::store::SagaStore;

use crate::command_bus::CommandBus;
use crate::dispatcher;
use crate::event_bus::EventBus;
use crate::object_repository::ObjectRepository;
use crate::saga_engine::SagaEngine;
use crate::scheduler::PartitionScheduler;

const DEFAULT_LANES: usize = 4;
const DEFAULT_LANE_CAPACITY: usize = 64;
const DEFAULT_LANE_PREFIX: &str = "cqrs-lane";

/// A fully wired capstan engine.
///
/// Dropping the engine (and any externally held bus handles) closes the
/// lanes and the dispatcher worker once in-flight work drains.
pub struct Engine {
    command_bus: Arc<CommandBus>,
    event_bus: Arc<EventBus>,
    dispatcher: JoinHandle<()>,
}

impl Engine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            registry: None,
            definitions: Vec::new(),
            event_repository: None,
            saga_store: None,
            clock: Arc::new(SystemClock),
            lanes: DEFAULT_LANES,
            lane_capacity: DEFAULT_LANE_CAPACITY,
            lane_prefix: DEFAULT_LANE_PREFIX.to_owned(),
        }
    }

    /// Returns the command bus.
    #[must_use]
    pub fn command_bus(&self) -> &Arc<CommandBus> {
        &self.command_bus
    }

    /// Returns the event bus.
    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Shuts the engine down, waiting for the dispatcher worker to drain
    /// any saga commands still queued.
    ///
    /// Lanes finish their queued jobs and exit once the bus handles drop.
    pub async fn shutdown(self) {
        let Engine {
            command_bus,
            event_bus,
            dispatcher,
        } = self;
        // Dropping the event bus releases the saga engine and with it the
        // dispatcher's sender; the worker drains and exits.
        drop(event_bus);
        drop(command_bus);
        let _ = dispatcher.await;
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    registry: Option<HandlerRegistry>,
    definitions: Vec<Arc<dyn SagaDefinition>>,
    event_repository: Option<Arc<dyn EventRepository>>,
    saga_store: Option<Arc<dyn SagaStore>>,
    clock: Arc<dyn Clock>,
    lanes: usize,
    lane_capacity: usize,
    lane_prefix: String,
}

impl EngineBuilder {
    /// Sets the handler registry. Required.
    #[must_use]
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers a saga definition.
    #[must_use]
    pub fn saga(mut self, definition: Arc<dyn SagaDefinition>) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Sets the event store boundary. Required.
    #[must_use]
    pub fn event_repository(mut self, repository: Arc<dyn EventRepository>) -> Self {
        self.event_repository = Some(repository);
        self
    }

    /// Sets the saga store boundary. Required when sagas are registered.
    #[must_use]
    pub fn saga_store(mut self, store: Arc<dyn SagaStore>) -> Self {
        self.saga_store = Some(store);
        self
    }

    /// Overrides the clock (defaults to [`SystemClock`]).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the number of execution lanes (defaults to 4).
    #[must_use]
    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    /// Sets each lane's queue capacity (defaults to 64).
    #[must_use]
    pub fn lane_capacity(mut self, capacity: usize) -> Self {
        self.lane_capacity = capacity;
        self
    }

    /// Sets the name prefix carried in lane tracing spans (defaults to
    /// `cqrs-lane`).
    #[must_use]
    pub fn lane_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lane_prefix = prefix.into();
        self
    }

    /// Wires and starts the engine. Must be called within a Tokio
    /// runtime: lanes and the dispatcher worker are spawned here.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when a required collaborator
    /// is missing or the lane configuration is invalid.
    pub fn build(self) -> Result<Engine, EngineError> {
        let registry = self
            .registry
            .ok_or_else(|| EngineError::Configuration("handler registry is required".into()))?;
        let event_repository = self
            .event_repository
            .ok_or_else(|| EngineError::Configuration("event repository is required".into()))?;
        let saga_store = self
            .saga_store
            .ok_or_else(|| EngineError::Configuration("saga store is required".into()))?;
        if self.lanes == 0 || self.lane_capacity == 0 {
            return Err(EngineError::Configuration(
                "lane count and capacity must be positive".into(),
            ));
        }

        let registry = Arc::new(registry);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let saga_engine = Arc::new(SagaEngine::new(
            self.definitions,
            saga_store,
            Arc::clone(&self.clock),
            outgoing_tx,
        ));
        let event_bus = Arc::new(EventBus::new(Arc::clone(&registry), saga_engine));
        let repository = Arc::new(ObjectRepository::new(
            event_repository,
            Arc::clone(&event_bus),
            Arc::clone(&registry),
            Arc::clone(&self.clock),
        ));
        let scheduler = Arc::new(PartitionScheduler::new(
            self.lanes,
            self.lane_capacity,
            &self.lane_prefix,
        ));
        let command_bus = Arc::new(CommandBus::new(scheduler, repository, registry));
        let dispatcher = dispatcher::spawn(Arc::downgrade(&command_bus), outgoing_rx);

        Ok(Engine {
            command_bus,
            event_bus,
            dispatcher,
        })
    }
}
