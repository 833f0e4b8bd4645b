//! Event store boundary.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::event::EventMessage;
use crate::id::EntityId;

/// Boundary trait for loading and appending an entity's event stream.
///
/// The engine calls this but does not implement durable storage; see
/// `capstan-test-support` for the in-memory reference implementation.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Loads the full event stream for an entity, ordered by version.
    /// An unknown entity yields an empty stream.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the underlying store fails.
    async fn retrieve(&self, entity_id: &EntityId) -> Result<Vec<EventMessage>, EngineError>;

    /// Appends new messages to an entity's stream with an optimistic
    /// concurrency check. `expected_version` is the version of the last
    /// event the writer believes is already stored (−1 for a new stream).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::VersionConflict`] when the stored stream has
    /// advanced past `expected_version`, or [`EngineError::Store`] on
    /// storage failure. On error nothing is appended.
    async fn append(
        &self,
        messages: &[EventMessage],
        expected_version: i64,
    ) -> Result<(), EngineError>;
}
