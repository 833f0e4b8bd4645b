//! Capstan Saga — long-running cross-entity processes.
//!
//! A saga correlates events from multiple entities, advances through an
//! explicit state machine, and queues follow-up commands that the engine
//! publishes after the saga has been persisted. This crate holds the saga
//! entity, the state-machine definition contract, timeout strategies, and
//! the saga store boundary; the execution engine that drives them lives in
//! `capstan-engine`.

pub mod definition;
pub mod saga;
pub mod store;
pub mod timeout;

pub use definition::{END_STATE, SagaDefinition, START_STATE, TransitionBinding};
pub use saga::{Saga, SagaData};
pub use store::{HandledEventRecord, SagaRecord, SagaStore};
pub use timeout::TimeoutStrategy;
