//! Capstan Engine — command routing, event fan-out, and saga execution.
//!
//! The engine wires the capstan contracts into a running system: commands
//! enter through the [`command_bus::CommandBus`], execute on the entity's
//! lane from the [`scheduler::PartitionScheduler`], commit through the
//! [`object_repository::ObjectRepository`], fan out on the
//! [`event_bus::EventBus`], and drive sagas through the
//! [`saga_engine::SagaEngine`]. Construction happens through
//! [`runtime::Engine`], which injects every collaborator explicitly.

pub mod command_bus;
mod dispatcher;
pub mod event_bus;
pub mod object_repository;
pub mod runtime;
pub mod saga_engine;
pub mod scheduler;

pub use command_bus::CommandBus;
pub use event_bus::EventBus;
pub use object_repository::ObjectRepository;
pub use runtime::{Engine, EngineBuilder};
pub use saga_engine::SagaEngine;
pub use scheduler::PartitionScheduler;
