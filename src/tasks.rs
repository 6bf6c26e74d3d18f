//! Periodic maintenance tasks driven by the supervisor (spec §4.4, §4.5).
//!
//! Grounded on `examples/original_source/pkg/service/tasks.go`
//! (`ExpirationTriggerTask`, `WorkflowCleanupTask`), wired up as
//! `supervisor::TaskComponent`s rather than Go's `RunTasker` interface.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{CleanupConfig, ExpirationConfig};
use crate::coordinator::Coordinator;
use crate::supervisor::TaskComponent;

/// Build the expiration scanner component (spec §4.4): on each tick, sweep
/// every cached transaction and revert timed-out ones.
pub fn expiration_task(
    coordinator: Coordinator,
    config: &ExpirationConfig,
) -> TaskComponent<impl Fn() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static> {
    TaskComponent::new("expiration", config.interval, config.warm_up, move || {
        let coordinator = coordinator.clone();
        // `RunTask` is synchronous in the original; this crate's task body
        // is itself invoked from an async `TaskComponent::run`, so spawn the
        // async sweep rather than block the ticker loop on it.
        tokio::spawn(async move {
            if let Err(err) = coordinator.update_expired().await {
                tracing::error!(error = %err, "expiration sweep failed");
            }
        });
        Ok(())
    })
}

/// Build the recipe cleanup component (spec §4.5): on each tick, promote
/// drained, transaction-free recipes to `Inactive` and evict them.
pub fn cleanup_task(
    coordinator: Coordinator,
    config: &CleanupConfig,
) -> TaskComponent<impl Fn() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static> {
    let warm_up = Duration::from_secs(5);
    TaskComponent::new("recipe_cleanup", config.interval, warm_up, move || {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(err) = coordinator.clear_inactive().await {
                tracing::error!(error = %err, "recipe cleanup sweep failed");
            }
        });
        Ok(())
    })
}
