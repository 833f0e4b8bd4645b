//! Engine error taxonomy.

use thiserror::Error;

use crate::id::{EntityId, SagaId};

/// Top-level error type for the capstan engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No aggregate state factory is registered for an entity type.
    #[error("no aggregate registered for entity type {0}")]
    UnknownEntityType(&'static str),

    /// No handler is registered for a (entity type, message type) pair.
    #[error("no handler registered for {message_type} on entity type {entity_type}")]
    NoHandlerFound {
        /// The entity type the message targeted.
        entity_type: &'static str,
        /// The type name of the unhandled message.
        message_type: &'static str,
    },

    /// User handler logic failed.
    #[error("handler failed: {0}")]
    Handler(String),

    /// Optimistic concurrency conflict on event append.
    #[error("version conflict on {entity_id}: expected version {expected}, stored {actual}")]
    VersionConflict {
        /// The entity whose stream had the conflict.
        entity_id: EntityId,
        /// The version the writer expected to append after.
        expected: i64,
        /// The last version actually stored.
        actual: i64,
    },

    /// An event or saga store operation failed.
    #[error("store failure: {0}")]
    Store(String),

    /// Events were durably appended but the fan-out after the append failed.
    ///
    /// The aggregate keeps its uncommitted buffer; downstream listeners must
    /// tolerate redelivery.
    #[error("event publication failed after append for {0}")]
    PublicationFailed(EntityId),

    /// A saga already holds a command pending publication.
    ///
    /// The outgoing-command slot has capacity one; the pending command must
    /// be flushed before another can be queued.
    #[error("a command is already pending publication for saga {0}")]
    CommandSlotOccupied(SagaId),

    /// The partition scheduler has shut down and accepts no further work.
    #[error("scheduler is shut down")]
    SchedulerClosed,

    /// The reply channel closed before the command pipeline delivered a result.
    #[error("result channel closed before completion")]
    ResultChannelClosed,

    /// Saga field data failed to serialize or deserialize.
    #[error("saga data codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The engine builder was given an incomplete or invalid configuration.
    #[error("engine configuration error: {0}")]
    Configuration(String),
}
