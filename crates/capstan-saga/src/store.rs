//! Saga store boundary.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use capstan_core::error::EngineError;
use capstan_core::id::{EntityId, SagaId};

/// Audit entry for one event a saga has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledEventRecord {
    /// The accepted event's type name.
    pub event_type: String,
    /// The saga's transition version after accepting the event.
    pub version: i32,
    /// When the transition was accepted.
    pub occurred_at: DateTime<Utc>,
}

/// Persisted snapshot of a saga.
#[derive(Debug, Clone)]
pub struct SagaRecord {
    /// The saga instance identifier.
    pub saga_id: SagaId,
    /// The saga type name from its definition.
    pub saga_type: String,
    /// When the saga was created.
    pub created_at: DateTime<Utc>,
    /// The current state name.
    pub current_state: String,
    /// Entity ids this saga is correlated with.
    pub associated_entities: BTreeSet<EntityId>,
    /// Count of accepted transitions.
    pub version: i32,
    /// Audit trail of accepted events.
    pub handled_events: Vec<HandledEventRecord>,
    /// The liveness deadline.
    pub scheduled_timeout: DateTime<Utc>,
    /// The saga's typed field data, serialized through its definition's
    /// codec.
    pub data: serde_json::Value,
}

/// Boundary trait for persisting sagas.
///
/// The engine calls this but does not implement durable storage; see
/// `capstan-test-support` for the in-memory reference implementation.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Returns the stored sagas of `saga_type` whose associated-entity set
    /// contains `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the underlying store fails.
    async fn find_associated_sagas(
        &self,
        entity_id: &EntityId,
        saga_type: &str,
    ) -> Result<Vec<SagaRecord>, EngineError>;

    /// Inserts or replaces the record for its saga id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the underlying store fails.
    async fn store_saga(&self, record: SagaRecord) -> Result<(), EngineError>;

    /// Removes the record for a saga that reached its terminal state.
    /// Deleting an unknown saga id is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the underlying store fails.
    async fn delete_saga(&self, saga_id: &SagaId) -> Result<(), EngineError>;
}
