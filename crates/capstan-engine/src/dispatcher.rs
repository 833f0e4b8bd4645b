//! Saga outgoing-command dispatcher.

use std::sync::Weak;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use capstan_core::command::Command;

use crate::command_bus::CommandBus;

/// Spawns the single dedicated worker that drains saga outgoing commands
/// into the command bus.
///
/// Exactly one worker drains the channel, so a saga's flushed command is
/// published once, and publication stays off the event-handling critical
/// path. The worker holds the bus weakly — the saga engine owns the
/// sending side through the live buses, so the worker exits once the
/// engine's handles drop, instead of keeping itself alive through its own
/// reference chain.
///
/// Must be called within a Tokio runtime.
pub(crate) fn spawn(
    command_bus: Weak<CommandBus>,
    mut outgoing: mpsc::UnboundedReceiver<Box<dyn Command>>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            while let Some(command) = outgoing.recv().await {
                let Some(bus) = command_bus.upgrade() else {
                    tracing::warn!("command bus is gone, dropping saga command");
                    break;
                };
                tracing::debug!(
                    command_type = command.command_type(),
                    entity_id = %command.entity_id(),
                    "publishing saga command"
                );
                bus.publish(command).await;
            }
            tracing::trace!("saga command dispatcher shutting down");
        }
        .instrument(tracing::info_span!("saga_dispatch")),
    )
}
