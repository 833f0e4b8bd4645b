//! Shared fixture domain for engine integration tests: a `record` entity
//! that is created, validated, and touched, plus the saga that validates
//! freshly created records.
#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use capstan_core::aggregate::Aggregate;
use capstan_core::command::{Command, CommandMeta};
use capstan_core::error::EngineError;
use capstan_core::event::DomainEvent;
use capstan_core::id::EntityId;
use capstan_core::registry::{CommandHandler, HandlerRegistry, HandlerRegistryBuilder};
use capstan_saga::definition::{
    END_STATE, START_STATE, SagaDefinition, TransitionBinding,
};
use capstan_saga::saga::SagaData;
use capstan_saga::timeout::TimeoutStrategy;

/// Entity type tag for the fixture aggregate.
pub const RECORD: &str = "record";

/// Installs a test subscriber once per process; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Saga state while a validation command is outstanding.
pub const VALIDATE_STATE: &str = "VALIDATE";

#[derive(Debug, Default)]
pub struct RecordState {
    pub created: bool,
    pub validated: bool,
    pub touches: u32,
}

#[derive(Debug)]
pub struct RecordCreated;

impl DomainEvent for RecordCreated {
    fn event_type(&self) -> &'static str {
        "record_created"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct RecordValidated;

impl DomainEvent for RecordValidated {
    fn event_type(&self) -> &'static str {
        "record_validated"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct RecordTouched;

impl DomainEvent for RecordTouched {
    fn event_type(&self) -> &'static str {
        "record_touched"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct CreateRecord {
    meta: CommandMeta,
}

impl CreateRecord {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            meta: CommandMeta::new(entity_id),
        }
    }
}

impl Command for CreateRecord {
    fn command_type(&self) -> &'static str {
        "create_record"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct ValidateRecord {
    meta: CommandMeta,
}

impl ValidateRecord {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            meta: CommandMeta::new(entity_id),
        }
    }
}

impl Command for ValidateRecord {
    fn command_type(&self) -> &'static str {
        "validate_record"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct TouchRecord {
    meta: CommandMeta,
}

impl TouchRecord {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            meta: CommandMeta::new(entity_id),
        }
    }
}

impl Command for TouchRecord {
    fn command_type(&self) -> &'static str {
        "touch_record"
    }

    fn meta(&self) -> &CommandMeta {
        &self.meta
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct CreateRecordHandler;

#[async_trait]
impl CommandHandler for CreateRecordHandler {
    async fn handle(
        &self,
        aggregate: &mut Aggregate,
        command: &dyn Command,
    ) -> Result<(), EngineError> {
        command
            .downcast_ref::<CreateRecord>()
            .ok_or_else(|| EngineError::Handler("expected CreateRecord".into()))?;
        if aggregate
            .state::<RecordState>()
            .is_some_and(|state| state.created)
        {
            return Err(EngineError::Handler("record already created".into()));
        }
        aggregate.apply(RecordCreated);
        Ok(())
    }
}

pub struct ValidateRecordHandler;

#[async_trait]
impl CommandHandler for ValidateRecordHandler {
    async fn handle(
        &self,
        aggregate: &mut Aggregate,
        command: &dyn Command,
    ) -> Result<(), EngineError> {
        command
            .downcast_ref::<ValidateRecord>()
            .ok_or_else(|| EngineError::Handler("expected ValidateRecord".into()))?;
        let state = aggregate
            .state::<RecordState>()
            .ok_or_else(|| EngineError::Handler("missing record state".into()))?;
        if !state.created {
            return Err(EngineError::Handler(
                "cannot validate a record that was never created".into(),
            ));
        }
        if state.validated {
            return Err(EngineError::Handler("record already validated".into()));
        }
        aggregate.apply(RecordValidated);
        Ok(())
    }
}

pub struct TouchRecordHandler;

#[async_trait]
impl CommandHandler for TouchRecordHandler {
    async fn handle(
        &self,
        aggregate: &mut Aggregate,
        command: &dyn Command,
    ) -> Result<(), EngineError> {
        command
            .downcast_ref::<TouchRecord>()
            .ok_or_else(|| EngineError::Handler("expected TouchRecord".into()))?;
        aggregate.apply(RecordTouched);
        Ok(())
    }
}

/// Builds the registry for the record fixture; tests append listeners
/// before calling `build`.
pub fn record_registry() -> HandlerRegistryBuilder {
    HandlerRegistry::builder()
        .aggregate::<RecordState, _>(RECORD, RecordState::default)
        .aggregate_event_handler::<RecordState, RecordCreated, _>(RECORD, 0, |state, _| {
            state.created = true;
            Ok(())
        })
        .aggregate_event_handler::<RecordState, RecordValidated, _>(RECORD, 0, |state, _| {
            state.validated = true;
            Ok(())
        })
        .aggregate_event_handler::<RecordState, RecordTouched, _>(RECORD, 0, |state, _| {
            state.touches += 1;
            Ok(())
        })
        .command_handler::<CreateRecord>(RECORD, 0, Arc::new(CreateRecordHandler))
        .command_handler::<ValidateRecord>(RECORD, 0, Arc::new(ValidateRecordHandler))
        .command_handler::<TouchRecord>(RECORD, 0, Arc::new(TouchRecordHandler))
}

/// Field data for the record-validation saga.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ValidationProgress {
    pub commands_issued: u32,
}

/// Saga that reacts to a created record by issuing its validation command,
/// then ends once the record is validated.
pub struct RecordValidationSaga {
    strategy: TimeoutStrategy,
    bindings: Vec<TransitionBinding>,
}

impl RecordValidationSaga {
    pub fn definition() -> Arc<dyn SagaDefinition> {
        Self::with_strategy(TimeoutStrategy::NoTimeout)
    }

    pub fn with_strategy(strategy: TimeoutStrategy) -> Arc<dyn SagaDefinition> {
        Arc::new(Self {
            strategy,
            bindings: vec![
                TransitionBinding::new::<RecordCreated, _>(START_STATE, |saga, meta, _| {
                    saga.enqueue_command(Box::new(ValidateRecord::new(meta.entity_id)))?;
                    if let Some(progress) = saga.data_mut::<ValidationProgress>() {
                        progress.commands_issued += 1;
                    }
                    Ok(VALIDATE_STATE)
                }),
                TransitionBinding::new::<RecordValidated, _>(VALIDATE_STATE, |_, _, _| {
                    Ok(END_STATE)
                }),
            ],
        })
    }
}

impl SagaDefinition for RecordValidationSaga {
    fn saga_type(&self) -> &'static str {
        "record_validation"
    }

    fn timeout_strategy(&self) -> TimeoutStrategy {
        self.strategy
    }

    fn new_data(&self) -> Box<dyn SagaData> {
        Box::new(ValidationProgress::default())
    }

    fn hydrate_data(&self, value: &serde_json::Value) -> Result<Box<dyn SagaData>, EngineError> {
        let data: ValidationProgress = serde_json::from_value(value.clone())?;
        Ok(Box::new(data))
    }

    fn bindings(&self) -> &[TransitionBinding] {
        &self.bindings
    }
}
