//! Partitioned execution lanes.
//!
//! A fixed pool of single-worker lanes provides actor-like serialization
//! per entity id: every job submitted for the same id lands on the same
//! lane and runs to completion before the next one starts. Distinct ids
//! may hash to distinct lanes and run concurrently. Collisions across
//! distinct ids only reduce concurrency, never correctness, because
//! serialization is per-lane.

use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::Instrument;

use capstan_core::error::EngineError;
use capstan_core::id::EntityId;

/// A unit of work queued onto a lane.
pub type LaneJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Maps entity ids onto a fixed pool of single-worker lanes.
pub struct PartitionScheduler {
    lanes: Vec<mpsc::Sender<LaneJob>>,
}

impl PartitionScheduler {
    /// Spawns `lane_count` lane tasks, each draining a bounded queue of
    /// `capacity` jobs. Lane tasks carry `name_prefix` and their index in
    /// their tracing span.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `lane_count` or `capacity` is zero.
    #[must_use]
    pub fn new(lane_count: usize, capacity: usize, name_prefix: &str) -> Self {
        assert!(lane_count > 0, "scheduler needs at least one lane");
        assert!(capacity > 0, "lane queue capacity must be positive");

        let lanes = (0..lane_count)
            .map(|index| {
                let (sender, mut receiver) = mpsc::channel::<LaneJob>(capacity);
                let span = tracing::info_span!("lane", name = %format!("{name_prefix}-{index}"));
                tokio::spawn(
                    async move {
                        while let Some(job) = receiver.recv().await {
                            job.await;
                        }
                        tracing::trace!("lane drained, shutting down");
                    }
                    .instrument(span),
                );
                sender
            })
            .collect();

        Self { lanes }
    }

    /// Returns the lane index an entity id is pinned to.
    #[must_use]
    pub fn lane_for(&self, entity_id: &EntityId) -> usize {
        let mut hasher = DefaultHasher::new();
        entity_id.hash(&mut hasher);
        usize::try_from(hasher.finish() % self.lanes.len() as u64).unwrap_or_default()
    }

    /// Queues a job onto the entity's lane, waiting for queue space when
    /// the lane is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SchedulerClosed`] when the lane task has
    /// shut down.
    pub async fn submit(&self, entity_id: &EntityId, job: LaneJob) -> Result<(), EngineError> {
        let lane = self.lane_for(entity_id);
        self.lanes[lane]
            .send(job)
            .await
            .map_err(|_| EngineError::SchedulerClosed)
    }
}
