//! Component supervisor: runs a fixed set of long-lived components as
//! tasks, shutting all of them down together (spec §4.8).
//!
//! Grounded on `examples/original_source/pkg/service/components.go`
//! (`Component`, `ComponentManager`, `ComponentRunContext`,
//! `TaskComponent`) — Go's goroutine-per-component plus a shared
//! `QuitCh`/`WaitGroup` translates to `tokio::spawn` plus a shared
//! `tokio::sync::watch` channel the supervisor flips once on shutdown,
//! cross-checked against `angzarr`'s `standalone::runtime` shutdown path
//! (`ctrl_c()`, aborting `JoinHandle`s) for how this crate's own binaries
//! should wire up signal handling. `watch` (rather than `Notify`) is the
//! right primitive here: `Notify::notify_waiters` only reaches tasks
//! currently parked in `.notified()`, so a component still in its
//! `warm_up` sleep would miss a shutdown fired during it; a `watch`
//! receiver instead sees any value it hasn't observed yet, whenever it
//! next checks, regardless of whether it was already waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A long-lived unit of work the supervisor runs until told to quit.
/// Mirrors Go's `Component` interface (`ComponentName`/`Run`).
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `quit` observes `true`. A returned `Err` is logged, not
    /// propagated — matching Go's `runComponent`, which logs a component's
    /// error and moves on rather than aborting the others.
    async fn run(&self, quit: watch::Receiver<bool>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Supervises a fixed set of `Component`s, spawning one task per component
/// and stopping all of them together on `shutdown`. Mirrors
/// `ComponentManager`'s single shared `QuitCh`/`WaitGroup`, replacing the
/// "already running" panic-on-reuse guard with a one-shot `run`/`shutdown`
/// pair that consumes `self`.
pub struct ComponentManager {
    components: Vec<Arc<dyn Component>>,
}

impl ComponentManager {
    pub fn new() -> Self {
        Self { components: Vec::new() }
    }

    /// Register a component to run. Mirrors `MustUse`, minus the
    /// running-manager panic guard: in Rust, registration only happens
    /// before `run` is ever called, by construction (there's no handle to
    /// call `register` on a manager that's already mid-`run`).
    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.components.push(component);
    }

    /// Start every registered component and return a handle that can stop
    /// them all via `shutdown`.
    pub fn run(self) -> RunningSupervisor {
        let (quit, _) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.components.len());

        tracing::info!(count = self.components.len(), "component manager started");
        for component in self.components {
            let quit = quit.subscribe();
            let name = component.name().to_string();
            let handle = tokio::spawn(async move {
                tracing::info!(component = %name, "component started");
                if let Err(err) = component.run(quit).await {
                    tracing::error!(component = %name, error = %err, "component error");
                }
                tracing::info!(component = %name, "component stopped");
            });
            handles.push(handle);
        }

        RunningSupervisor { quit, handles }
    }
}

impl Default for ComponentManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A `ComponentManager` that has started. `shutdown` notifies every
/// component's quit signal and waits for all tasks to finish, mirroring
/// `ComponentManager::Shutdown`'s `wg.Wait()`.
pub struct RunningSupervisor {
    quit: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl RunningSupervisor {
    pub async fn shutdown(self) {
        // Every component's receiver sees this the next time it checks,
        // whether it's already parked on `changed()` or hasn't started
        // waiting yet (e.g. still asleep in `TaskComponent`'s warm-up).
        let _ = self.quit.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("component manager stopped");
    }
}

/// A component that runs `tasker` on a fixed interval after an initial
/// warm-up delay. Mirrors `TaskComponent`/`RunTasker`.
pub struct TaskComponent<F>
where
    F: Fn() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
{
    name: String,
    task_name: String,
    interval: Duration,
    warm_up: Duration,
    tasker: F,
}

impl<F> TaskComponent<F>
where
    F: Fn() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, interval: Duration, warm_up: Duration, tasker: F) -> Self {
        let task_name = name.into();
        Self {
            name: format!("task_{task_name}"),
            task_name,
            interval,
            warm_up,
            tasker,
        }
    }
}

#[async_trait]
impl<F> Component for TaskComponent<F>
where
    F: Fn() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut quit: watch::Receiver<bool>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Raced against the warm-up sleep itself, not just the post-warm-up
        // loop: a shutdown fired while this task is still asleep here must
        // still be observed instead of lost.
        tokio::select! {
            _ = quit.changed() => return Ok(()),
            _ = tokio::time::sleep(self.warm_up) => {}
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; consume it before the loop

        loop {
            tracing::debug!(task = %self.task_name, "task execute");
            match (self.tasker)() {
                Ok(()) => tracing::debug!(task = %self.task_name, "task success"),
                Err(err) => tracing::error!(task = %self.task_name, error = %err, "task fail"),
            }

            tokio::select! {
                _ = quit.changed() => return Ok(()),
                _ = ticker.tick() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingComponent {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Component for CountingComponent {
        fn name(&self) -> &str {
            "counter"
        }

        async fn run(&self, mut quit: watch::Receiver<bool>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.count.fetch_add(1, Ordering::SeqCst);
            let _ = quit.changed().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_stops_all_components() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut manager = ComponentManager::new();
        manager.register(Arc::new(CountingComponent { count: count.clone() }));
        manager.register(Arc::new(CountingComponent { count: count.clone() }));

        let running = manager.run();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        running.shutdown().await;
    }

    #[tokio::test]
    async fn task_component_runs_after_warm_up_and_respects_quit() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let component = TaskComponent::new(
            "expire",
            Duration::from_millis(5),
            Duration::from_millis(1),
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        let (quit, quit_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { component.run(quit_rx).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = quit.send(true);
        handle.await.unwrap().unwrap();
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn task_component_quit_during_warm_up_is_observed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let component = TaskComponent::new(
            "expire",
            Duration::from_millis(5),
            Duration::from_millis(200),
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        let (quit, quit_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { component.run(quit_rx).await });

        // Fired well before `warm_up` elapses: with a lost-wakeup signal
        // this would hang until warm_up's sleep finishes (or forever, if
        // `shutdown` only notified tasks already parked on the signal).
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = quit.send(true);
        tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .expect("quit during warm-up should be observed promptly")
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
