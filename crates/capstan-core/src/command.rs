//! Command abstractions.

use std::any::Any;

use chrono::{DateTime, Utc};

use crate::id::{CommandId, EntityId};

/// Metadata carried by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMeta {
    /// Unique identifier of this submission.
    pub command_id: CommandId,
    /// The entity the command targets; determines the routing lane and
    /// which aggregate is loaded.
    pub entity_id: EntityId,
    /// Timestamp of command creation.
    pub issued_at: DateTime<Utc>,
}

impl CommandMeta {
    /// Creates metadata for a command targeting `entity_id`, stamped with
    /// the current wall-clock time.
    #[must_use]
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            command_id: CommandId::generate(),
            entity_id,
            issued_at: Utc::now(),
        }
    }
}

/// Trait that all commands implement.
///
/// A command is an intent to change exactly one aggregate. Commands travel
/// through the engine as `Box<dyn Command>` and are downcast back to their
/// concrete type inside the registered handler.
pub trait Command: Any + Send + Sync + std::fmt::Debug {
    /// Returns the command type name (used for logging and routing errors).
    fn command_type(&self) -> &'static str;

    /// Returns the command metadata.
    fn meta(&self) -> &CommandMeta;

    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl dyn Command {
    /// Attempts to downcast this command to a concrete type.
    #[must_use]
    pub fn downcast_ref<C: Command>(&self) -> Option<&C> {
        self.as_any().downcast_ref::<C>()
    }

    /// Returns the entity the command targets.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.meta().entity_id
    }
}
