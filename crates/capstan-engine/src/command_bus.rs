//! Command routing.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::Instrument;

use capstan_core::command::Command;
use capstan_core::error::EngineError;
use capstan_core::id::EntityId;
use capstan_core::registry::HandlerRegistry;

use crate::object_repository::ObjectRepository;
use crate::scheduler::PartitionScheduler;

/// Routes commands onto their entity's lane, runs the registered handlers
/// against the loaded aggregate, and commits the result.
pub struct CommandBus {
    scheduler: Arc<PartitionScheduler>,
    repository: Arc<ObjectRepository>,
    registry: Arc<HandlerRegistry>,
}

impl CommandBus {
    /// Creates a command bus over the given scheduler, repository, and
    /// registry.
    #[must_use]
    pub fn new(
        scheduler: Arc<PartitionScheduler>,
        repository: Arc<ObjectRepository>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            scheduler,
            repository,
            registry,
        }
    }

    /// Publishes a command without waiting for its outcome.
    ///
    /// The call returns once the command is queued on its lane. Terminal
    /// errors are logged, not reported, since no caller is waiting.
    pub async fn publish(&self, command: Box<dyn Command>) {
        let entity_id = command.entity_id();
        let repository = Arc::clone(&self.repository);
        let registry = Arc::clone(&self.registry);

        let submitted = self
            .scheduler
            .submit(
                &entity_id,
                Box::pin(async move {
                    if let Err(error) = Self::process(&repository, &registry, command).await {
                        tracing::warn!(entity_id = %entity_id, %error, "command failed");
                    }
                }),
            )
            .await;
        if let Err(error) = submitted {
            tracing::error!(entity_id = %entity_id, %error, "command could not be queued");
        }
    }

    /// Publishes a command and waits for its outcome, returning the
    /// affected entity id.
    ///
    /// The pipeline runs on the entity's lane; this future resumes on the
    /// caller's task once the lane sends the result, so a slow caller
    /// never occupies the lane.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoHandlerFound`] when the command has no
    /// registered handler, the handler's error when one fails (nothing is
    /// committed for that command), a store or publication error from the
    /// commit, or [`EngineError::SchedulerClosed`] /
    /// [`EngineError::ResultChannelClosed`] when the engine is shutting
    /// down.
    pub async fn publish_and_wait(
        &self,
        command: Box<dyn Command>,
    ) -> Result<EntityId, EngineError> {
        let entity_id = command.entity_id();
        let repository = Arc::clone(&self.repository);
        let registry = Arc::clone(&self.registry);
        let (reply, result) = oneshot::channel();

        self.scheduler
            .submit(
                &entity_id,
                Box::pin(async move {
                    let outcome = Self::process(&repository, &registry, command).await;
                    // A dropped receiver means the caller stopped waiting;
                    // the work itself is already done.
                    let _ = reply.send(outcome);
                }),
            )
            .await?;

        result.await.map_err(|_| EngineError::ResultChannelClosed)?
    }

    /// The lane-pinned pipeline: retrieve, run the ordered handler chain,
    /// save.
    async fn process(
        repository: &ObjectRepository,
        registry: &HandlerRegistry,
        command: Box<dyn Command>,
    ) -> Result<EntityId, EngineError> {
        let entity_id = command.entity_id();
        let span = tracing::info_span!(
            "command",
            command_type = command.command_type(),
            entity_id = %entity_id,
        );

        async move {
            let handlers =
                registry.command_handlers(entity_id.entity_type(), command.as_any().type_id());
            if handlers.is_empty() {
                return Err(EngineError::NoHandlerFound {
                    entity_type: entity_id.entity_type(),
                    message_type: command.command_type(),
                });
            }

            let mut aggregate = repository.retrieve(entity_id).await?;
            for handler in handlers {
                handler.handler.handle(&mut aggregate, command.as_ref()).await?;
            }
            repository.save(&mut aggregate).await?;

            tracing::debug!(version = aggregate.version(), "command committed");
            Ok(entity_id)
        }
        .instrument(span)
        .await
    }
}
