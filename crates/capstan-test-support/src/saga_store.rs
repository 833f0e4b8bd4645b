//! Test saga stores — in-memory `SagaStore` implementations.

use std::sync::Mutex;

use async_trait::async_trait;

use capstan_core::error::EngineError;
use capstan_core::id::{EntityId, SagaId};
use capstan_saga::store::{SagaRecord, SagaStore};

/// A saga store keeping records in memory, with upsert-by-id semantics.
#[derive(Default)]
pub struct InMemorySagaStore {
    records: Mutex<Vec<SagaRecord>>,
}

impl InMemorySagaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every stored record.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn records(&self) -> Vec<SagaRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn find_associated_sagas(
        &self,
        entity_id: &EntityId,
        saga_type: &str,
    ) -> Result<Vec<SagaRecord>, EngineError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.saga_type == saga_type)
            .filter(|record| record.associated_entities.contains(entity_id))
            .cloned()
            .collect())
    }

    async fn store_saga(&self, record: SagaRecord) -> Result<(), EngineError> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records
            .iter_mut()
            .find(|existing| existing.saga_id == record.saga_id)
        {
            *existing = record;
        } else {
            records.push(record);
        }
        Ok(())
    }

    async fn delete_saga(&self, saga_id: &SagaId) -> Result<(), EngineError> {
        self.records
            .lock()
            .unwrap()
            .retain(|record| record.saga_id != *saga_id);
        Ok(())
    }
}

/// A saga store that always fails, for error-path tests.
#[derive(Debug, Default)]
pub struct FailingSagaStore;

#[async_trait]
impl SagaStore for FailingSagaStore {
    async fn find_associated_sagas(
        &self,
        _entity_id: &EntityId,
        _saga_type: &str,
    ) -> Result<Vec<SagaRecord>, EngineError> {
        Err(EngineError::Store("connection refused".into()))
    }

    async fn store_saga(&self, _record: SagaRecord) -> Result<(), EngineError> {
        Err(EngineError::Store("connection refused".into()))
    }

    async fn delete_saga(&self, _saga_id: &SagaId) -> Result<(), EngineError> {
        Err(EngineError::Store("connection refused".into()))
    }
}
