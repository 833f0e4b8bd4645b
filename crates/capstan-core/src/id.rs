//! Typed identifiers.

use std::fmt;

use uuid::Uuid;

/// Identifier of an event-sourced entity (aggregate instance).
///
/// Carries the owning entity-type tag alongside the raw value so that two
/// entities of different types never compare equal, and so the engine can
/// resolve the aggregate type from an id alone. Equality, hashing, and
/// ordering derive from both fields and are stable across runs, which the
/// partition scheduler relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    entity_type: &'static str,
    value: Uuid,
}

impl EntityId {
    /// Creates an id for the given entity type with a fresh random value.
    #[must_use]
    pub fn generate(entity_type: &'static str) -> Self {
        Self {
            entity_type,
            value: Uuid::new_v4(),
        }
    }

    /// Creates an id for the given entity type from an existing value.
    #[must_use]
    pub fn from_uuid(entity_type: &'static str, value: Uuid) -> Self {
        Self { entity_type, value }
    }

    /// Returns the entity-type tag this id belongs to.
    #[must_use]
    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub fn value(&self) -> Uuid {
        self.value
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}.{}]", self.entity_type, self.value)
    }
}

/// Identifier of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Generates a fresh saga id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a saga id from an existing value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a single command submission.
///
/// Uses UUID v7 so ids sort by submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Generates a fresh, time-sortable command id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
