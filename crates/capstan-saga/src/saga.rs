//! The saga entity.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use capstan_core::command::Command;
use capstan_core::error::EngineError;
use capstan_core::id::{EntityId, SagaId};

use crate::definition::{SagaDefinition, START_STATE};
use crate::store::{HandledEventRecord, SagaRecord};

/// Typed, saga-specific field data.
///
/// Implemented automatically for any `Any + Send + Sync + Debug +
/// Serialize` type; the serde round-trip through the definition's
/// [`hydrate_data`](SagaDefinition::hydrate_data) replaces opaque
/// reflective hydration with an explicit per-saga-type schema.
pub trait SagaData: Any + Send + Sync + std::fmt::Debug {
    /// Serializes the field data for persistence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Codec`] when serialization fails.
    fn to_value(&self) -> Result<serde_json::Value, EngineError>;

    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns `self` as mutable [`Any`] for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Sync + std::fmt::Debug + serde::Serialize> SagaData for T {
    fn to_value(&self) -> Result<serde_json::Value, EngineError> {
        serde_json::to_value(self).map_err(EngineError::from)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A long-lived correlation process driven by events.
///
/// A saga is created in [`START_STATE`], advances through the states its
/// [`SagaDefinition`] declares, accumulates associated entity ids, and may
/// hold one outgoing command pending publication. The pending-command slot
/// deliberately has capacity one: the previous command must be flushed
/// before another can be queued.
pub struct Saga {
    saga_id: SagaId,
    definition: Arc<dyn SagaDefinition>,
    created_at: DateTime<Utc>,
    current_state: String,
    version: i32,
    associated_entities: BTreeSet<EntityId>,
    handled_events: Vec<HandledEventRecord>,
    scheduled_timeout: DateTime<Utc>,
    data: Box<dyn SagaData>,
    pending_command: Option<Box<dyn Command>>,
}

impl Saga {
    /// Creates a brand-new saga instance in [`START_STATE`].
    #[must_use]
    pub fn start(definition: Arc<dyn SagaDefinition>, now: DateTime<Utc>) -> Self {
        let scheduled_timeout = definition.timeout_strategy().initial_deadline(now);
        let data = definition.new_data();
        Self {
            saga_id: SagaId::generate(),
            definition,
            created_at: now,
            current_state: START_STATE.to_owned(),
            version: 0,
            associated_entities: BTreeSet::new(),
            handled_events: Vec::new(),
            scheduled_timeout,
            data,
            pending_command: None,
        }
    }

    /// Rebuilds a saga from its persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Codec`] when the record's field data does
    /// not deserialize through the definition's schema.
    pub fn rehydrate(
        definition: Arc<dyn SagaDefinition>,
        record: SagaRecord,
    ) -> Result<Self, EngineError> {
        let data = definition.hydrate_data(&record.data)?;
        Ok(Self {
            saga_id: record.saga_id,
            definition,
            created_at: record.created_at,
            current_state: record.current_state,
            version: record.version,
            associated_entities: record.associated_entities,
            handled_events: record.handled_events,
            scheduled_timeout: record.scheduled_timeout,
            data,
            pending_command: None,
        })
    }

    /// Returns the saga instance identifier.
    #[must_use]
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Returns this saga's definition.
    #[must_use]
    pub fn definition(&self) -> &Arc<dyn SagaDefinition> {
        &self.definition
    }

    /// Returns when the saga was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the current state name.
    #[must_use]
    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    /// Returns the count of accepted transitions.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the entity ids this saga is correlated with.
    #[must_use]
    pub fn associated_entities(&self) -> &BTreeSet<EntityId> {
        &self.associated_entities
    }

    /// Returns the liveness deadline.
    #[must_use]
    pub fn scheduled_timeout(&self) -> DateTime<Utc> {
        self.scheduled_timeout
    }

    /// Returns whether the deadline has passed at `now`.
    #[must_use]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        now > self.scheduled_timeout
    }

    /// Returns whether the saga is eligible for further transitions: not
    /// timed out and in a state with outgoing transitions.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_timed_out(now) && self.definition.has_outgoing(&self.current_state)
    }

    /// Returns the saga's typed field data, or `None` on a type mismatch.
    #[must_use]
    pub fn data<D: SagaData>(&self) -> Option<&D> {
        self.data.as_any().downcast_ref::<D>()
    }

    /// Returns the saga's typed field data mutably, or `None` on a type
    /// mismatch.
    #[must_use]
    pub fn data_mut<D: SagaData>(&mut self) -> Option<&mut D> {
        self.data.as_any_mut().downcast_mut::<D>()
    }

    /// Queues a command for publication after the saga persists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandSlotOccupied`] when a command is
    /// already pending; the slot has capacity one and is never silently
    /// overwritten.
    pub fn enqueue_command(&mut self, command: Box<dyn Command>) -> Result<(), EngineError> {
        if self.pending_command.is_some() {
            return Err(EngineError::CommandSlotOccupied(self.saga_id));
        }
        self.pending_command = Some(command);
        Ok(())
    }

    /// Removes and returns the pending command. The post-persist flush is
    /// the only caller.
    #[must_use]
    pub fn take_pending_command(&mut self) -> Option<Box<dyn Command>> {
        self.pending_command.take()
    }

    /// Records an accepted transition: links the triggering entity,
    /// advances the transition version and audit trail, moves to
    /// `new_state`, and recomputes the deadline per the timeout strategy.
    pub fn record_transition(
        &mut self,
        trigger: EntityId,
        event_type: &str,
        new_state: &str,
        now: DateTime<Utc>,
    ) {
        self.associated_entities.insert(trigger);
        self.version += 1;
        self.handled_events.push(HandledEventRecord {
            event_type: event_type.to_owned(),
            version: self.version,
            occurred_at: now,
        });
        self.current_state = new_state.to_owned();
        self.scheduled_timeout = self
            .definition
            .timeout_strategy()
            .next_deadline(self.scheduled_timeout, now);
    }

    /// Snapshots the saga into its persisted form.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Codec`] when the field data fails to
    /// serialize.
    pub fn to_record(&self) -> Result<SagaRecord, EngineError> {
        Ok(SagaRecord {
            saga_id: self.saga_id,
            saga_type: self.definition.saga_type().to_owned(),
            created_at: self.created_at,
            current_state: self.current_state.clone(),
            associated_entities: self.associated_entities.clone(),
            version: self.version,
            handled_events: self.handled_events.clone(),
            scheduled_timeout: self.scheduled_timeout,
            data: self.data.to_value()?,
        })
    }
}

impl std::fmt::Debug for Saga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Saga")
            .field("saga_id", &self.saga_id)
            .field("saga_type", &self.definition.saga_type())
            .field("current_state", &self.current_state)
            .field("version", &self.version)
            .field("associated_entities", &self.associated_entities)
            .field("scheduled_timeout", &self.scheduled_timeout)
            .field("data", &self.data)
            .field("pending_command", &self.pending_command)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::{Saga, SagaData};
    use crate::definition::{END_STATE, SagaDefinition, START_STATE, TransitionBinding};
    use crate::timeout::TimeoutStrategy;
    use capstan_core::command::{Command, CommandMeta};
    use capstan_core::error::EngineError;
    use capstan_core::event::DomainEvent;
    use capstan_core::id::EntityId;

    #[derive(Debug)]
    struct Requested;

    impl DomainEvent for Requested {
        fn event_type(&self) -> &'static str {
            "requested"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
    struct Progress {
        accepted: u32,
    }

    #[derive(Debug)]
    struct Probe {
        meta: CommandMeta,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                meta: CommandMeta::new(EntityId::generate("probe")),
            }
        }
    }

    impl Command for Probe {
        fn command_type(&self) -> &'static str {
            "probe"
        }

        fn meta(&self) -> &CommandMeta {
            &self.meta
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Definition {
        strategy: TimeoutStrategy,
        bindings: Vec<TransitionBinding>,
    }

    impl Definition {
        fn with_strategy(strategy: TimeoutStrategy) -> Arc<dyn SagaDefinition> {
            Arc::new(Self {
                strategy,
                bindings: vec![
                    TransitionBinding::new::<Requested, _>(START_STATE, |_, _, _| Ok("PENDING")),
                    TransitionBinding::new::<Requested, _>("PENDING", |_, _, _| Ok(END_STATE)),
                ],
            })
        }
    }

    impl SagaDefinition for Definition {
        fn saga_type(&self) -> &'static str {
            "request_tracking"
        }

        fn timeout_strategy(&self) -> TimeoutStrategy {
            self.strategy
        }

        fn new_data(&self) -> Box<dyn SagaData> {
            Box::new(Progress::default())
        }

        fn hydrate_data(
            &self,
            value: &serde_json::Value,
        ) -> Result<Box<dyn SagaData>, EngineError> {
            let data: Progress = serde_json::from_value(value.clone())?;
            Ok(Box::new(data))
        }

        fn bindings(&self) -> &[TransitionBinding] {
            &self.bindings
        }
    }

    #[test]
    fn fresh_saga_starts_live_in_start_state() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let saga = Saga::start(Definition::with_strategy(TimeoutStrategy::NoTimeout), now);

        assert_eq!(saga.current_state(), START_STATE);
        assert_eq!(saga.version(), 0);
        assert!(saga.is_live(now));
        assert!(saga.associated_entities().is_empty());
    }

    #[test]
    fn command_slot_has_capacity_one() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut saga = Saga::start(Definition::with_strategy(TimeoutStrategy::NoTimeout), now);

        saga.enqueue_command(Box::new(Probe::new())).unwrap();
        let second = saga.enqueue_command(Box::new(Probe::new()));
        assert!(matches!(
            second,
            Err(EngineError::CommandSlotOccupied(id)) if id == saga.saga_id()
        ));

        assert!(saga.take_pending_command().is_some());
        assert!(saga.take_pending_command().is_none());
        saga.enqueue_command(Box::new(Probe::new())).unwrap();
    }

    #[test]
    fn record_transition_links_entity_and_advances_version() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut saga = Saga::start(Definition::with_strategy(TimeoutStrategy::NoTimeout), now);
        let trigger = EntityId::generate("request");

        saga.record_transition(trigger, "requested", "PENDING", now);

        assert_eq!(saga.current_state(), "PENDING");
        assert_eq!(saga.version(), 1);
        assert!(saga.associated_entities().contains(&trigger));
    }

    #[test]
    fn since_start_saga_times_out_and_goes_dead() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let strategy = TimeoutStrategy::SinceStart(Duration::milliseconds(1));
        let saga = Saga::start(Definition::with_strategy(strategy), created);

        let before = created + Duration::milliseconds(1);
        assert!(!saga.is_timed_out(before));
        assert!(saga.is_live(before));

        let after = created + Duration::milliseconds(2);
        assert!(saga.is_timed_out(after));
        assert!(!saga.is_live(after));
    }

    #[test]
    fn since_last_event_transition_extends_the_deadline() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let strategy = TimeoutStrategy::SinceLastEvent(Duration::minutes(5));
        let mut saga = Saga::start(Definition::with_strategy(strategy), created);

        let later = created + Duration::minutes(4);
        saga.record_transition(EntityId::generate("request"), "requested", "PENDING", later);

        assert_eq!(saga.scheduled_timeout(), later + Duration::minutes(5));
    }

    #[test]
    fn record_round_trip_preserves_state_and_data() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let definition = Definition::with_strategy(TimeoutStrategy::NoTimeout);
        let mut saga = Saga::start(Arc::clone(&definition), now);
        let trigger = EntityId::generate("request");
        saga.data_mut::<Progress>().unwrap().accepted = 3;
        saga.record_transition(trigger, "requested", "PENDING", now);

        let record = saga.to_record().unwrap();
        let revived = Saga::rehydrate(definition, record).unwrap();

        assert_eq!(revived.saga_id(), saga.saga_id());
        assert_eq!(revived.current_state(), "PENDING");
        assert_eq!(revived.version(), 1);
        assert_eq!(revived.data::<Progress>().unwrap().accepted, 3);
        assert!(revived.associated_entities().contains(&trigger));
    }
}
