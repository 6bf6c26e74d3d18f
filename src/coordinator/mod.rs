//! The coordinator wires `Cache`, `Storage`, and `Hub` together into the
//! saga engine described by spec §4: recipe registration, trigger
//! handling, stage transition, and expiration/cleanup sweeps.
//!
//! Grounded on `examples/original_source/pkg/service/coordinator.go`
//! (`Coordinator`, `NewCoordinator`, `Register`, `transition`,
//! `createWorkflowTriggerHandler`, `createTransactionSuccessHandler`,
//! `createTransactionFailureHandler`, `UpdateExpired`) — the handler
//! closures stay closures here too, but since `ReplyHandler`/`RawHandler`
//! are synchronous `Fn`, each one spawns a task to call back into
//! `async fn transition`, the way a Go handler runs synchronously inline
//! but this crate's handlers must hand off to the async runtime.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use crate::cache::Cache;
use crate::error::CoordinatorError;
use crate::hub::{failure_reply_topic, success_reply_topic, Hub};
use crate::proto::Request;
use crate::recipe::{generate_id, Recipe, RecipeStatus};
use crate::storage::Storage;
use crate::transaction::{StepOutcome, Transaction};

struct Inner {
    cache: Arc<dyn Cache>,
    hub: Arc<dyn Hub>,
    /// Readiness gate (spec §4.6/§5): closed while `recover` is replaying
    /// recipes/transactions, so a trigger or reply arriving mid-recovery
    /// waits rather than racing the replay. Opened once and never closed
    /// again, so `watch` (not `Notify`, whose wakeup is lost for a task
    /// not yet awaiting) is the right primitive: a late subscriber still
    /// observes the open value immediately instead of missing it.
    ready: watch::Sender<bool>,
}

/// Cheaply cloneable handle to the coordinator; clones share the same
/// cache/hub. Needs to be `Clone` because reply handlers capture one to
/// call back into `advance` from a spawned task.
#[derive(Clone)]
pub struct Coordinator(Arc<Inner>);

impl Coordinator {
    pub fn new(cache: Arc<dyn Cache>, hub: Arc<dyn Hub>) -> Self {
        Self::new_with_ready(cache, hub, true)
    }

    fn new_with_ready(cache: Arc<dyn Cache>, hub: Arc<dyn Hub>, ready: bool) -> Self {
        let (ready, _) = watch::channel(ready);
        Self(Arc::new(Inner { cache, hub, ready }))
    }

    /// The underlying cache, for callers that need to inspect in-flight
    /// transactions directly (e.g. to look up a reply topic by id).
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.0.cache
    }

    /// Block until `recover`'s replay has finished (a no-op if the gate is
    /// already open, e.g. every coordinator built via `new` rather than
    /// `recover`).
    async fn wait_until_ready(&self) {
        let mut ready = self.0.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Build a coordinator and re-hydrate it from `storage`: every saved
    /// recipe is re-registered (re-subscribing its trigger), then every
    /// non-terminal transaction is re-attached to its recipe and stepped
    /// once to resume wherever it left off. Mirrors `NewCoordinator`.
    pub async fn recover(
        cache: Arc<dyn Cache>,
        hub: Arc<dyn Hub>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, CoordinatorError> {
        let coordinator = Self::new_with_ready(cache, hub, false);

        let recipes = storage
            .load_all_recipes()
            .await
            .map_err(|e| CoordinatorError::Recovery(e.to_string()))?;
        for record in recipes {
            let recipe = Arc::new(Recipe::from_record(record));
            if let Err(err) = coordinator.register_recipe(recipe).await {
                tracing::warn!(error = %err, "failed to re-register recipe during recovery");
            }
        }

        let transactions = storage
            .load_active_transactions()
            .await
            .map_err(|e| CoordinatorError::Recovery(e.to_string()))?;
        for record in transactions {
            let recipe = match coordinator.0.cache.get_recipe_by_id(&record.recipe_id).await {
                Ok(Some(recipe)) => recipe,
                _ => {
                    tracing::warn!(recipe_id = %record.recipe_id, "dropping orphaned transaction during recovery");
                    continue;
                }
            };
            recipe.increment_active();
            let transaction = Arc::new(Transaction::from_record(record, recipe));
            if let Err(err) = coordinator.0.cache.put_transaction(transaction.clone()).await {
                tracing::warn!(error = %err, "failed to re-cache transaction during recovery");
                continue;
            }
            // Bypass the readiness gate: it isn't open yet, and this *is*
            // the replay the gate exists to hold other callers back for.
            if let Err(err) = coordinator.advance_unready(transaction, None, None).await {
                tracing::warn!(error = %err, "failed to resume transaction during recovery");
            }
        }

        let _ = coordinator.0.ready.send(true);
        Ok(coordinator)
    }

    /// Register a new recipe (spec §4.2). If an `Active` recipe with the
    /// same name already exists, it is hot-swapped into `Draining`
    /// (new transactions stop routing to it; existing ones finish on it)
    /// and the new recipe takes over the trigger subscription.
    pub async fn register(&self, mut recipe: Recipe) -> Result<Arc<Recipe>, CoordinatorError> {
        recipe.id = generate_id();
        let recipe = Arc::new(recipe);
        self.register_recipe(recipe).await
    }

    async fn register_recipe(&self, recipe: Arc<Recipe>) -> Result<Arc<Recipe>, CoordinatorError> {
        if let Some(existing) = self.0.cache.get_recipe_by_name(&recipe.name).await? {
            if existing.status() == RecipeStatus::Active {
                if !existing.compare_and_swap_status(RecipeStatus::Active, RecipeStatus::Draining) {
                    return Err(CoordinatorError::MultiModify(recipe.name.clone()));
                }
                self.0.cache.retire_from_name_index(&existing.name).await?;
                self.0.hub.cancel_group(&existing.id).await?;
            }
        }

        self.0.cache.put_recipe(recipe.clone()).await?;

        let triggered_by = recipe.triggered_by.clone();
        let coordinator = self.clone();
        let recipe_for_trigger = recipe.clone();
        self.0
            .hub
            .sub_group(
                &recipe.id,
                &triggered_by,
                Box::new(move |data: Bytes| {
                    let coordinator = coordinator.clone();
                    let recipe = recipe_for_trigger.clone();
                    let data = data.to_vec();
                    tokio::spawn(async move {
                        if let Err(err) = coordinator.handle_trigger(recipe, data).await {
                            tracing::error!(error = %err, "failed to handle recipe trigger");
                        }
                    });
                }),
            )
            .await?;

        Ok(recipe)
    }

    async fn handle_trigger(&self, recipe: Arc<Recipe>, data: Vec<u8>) -> Result<(), CoordinatorError> {
        if recipe.status() != RecipeStatus::Active {
            tracing::debug!(recipe = %recipe.name, "ignoring trigger for non-active recipe");
            return Ok(());
        }

        recipe.increment_active();
        let transaction = Arc::new(Transaction::new(generate_id(), recipe, data));
        self.0.cache.put_transaction(transaction.clone()).await?;
        self.transition(transaction).await
    }

    /// Mark the named `Active` recipe `Draining`, so it stops accepting
    /// new transactions but keeps serving in-flight ones (spec §4.5).
    pub async fn unload_recipe(&self, name: &str) -> Result<(), CoordinatorError> {
        let Some(recipe) = self.0.cache.get_recipe_by_name(name).await? else {
            return Err(CoordinatorError::NotFound(name.to_string()));
        };

        if !recipe.compare_and_swap_status(RecipeStatus::Active, RecipeStatus::Draining) {
            return Err(CoordinatorError::MultiModify(name.to_string()));
        }

        self.0.cache.retire_from_name_index(&recipe.name).await?;
        self.0.hub.cancel_group(&recipe.id).await?;
        Ok(())
    }

    /// Sweep every `Draining` recipe with zero in-flight transactions into
    /// `Inactive` and drop it from the cache (spec §4.5).
    pub async fn clear_inactive(&self) -> Result<(), CoordinatorError> {
        for recipe in self.0.cache.all_recipes().await? {
            if recipe.status() == RecipeStatus::Draining && recipe.active_transactions() == 0 {
                if recipe.compare_and_swap_status(RecipeStatus::Draining, RecipeStatus::Inactive) {
                    self.0.cache.remove_recipe(&recipe).await?;
                }
            }
        }
        Ok(())
    }

    /// Scan every cached transaction and revert any `Executing` one whose
    /// stage timeout has elapsed (spec §4.4: one scan loop, no per-transaction
    /// timer).
    pub async fn update_expired(&self) -> Result<(), CoordinatorError> {
        use crate::transaction::TransactionState;

        let collected = Arc::new(std::sync::Mutex::new(Vec::new()));
        let collected_for_visitor = collected.clone();
        self.0
            .cache
            .for_each_transaction(Box::new(move |t| {
                collected_for_visitor.lock().unwrap().push(t.clone());
                Ok(())
            }))
            .await?;
        let transactions = std::mem::take(&mut *collected.lock().unwrap());

        for transaction in transactions {
            let is_expired = transaction.is_expired().await;
            let state = transaction.state().await;
            if is_expired && state == TransactionState::Executing {
                self.advance(transaction, None, Some(false)).await?;
            }
        }

        Ok(())
    }

    /// Advance a transaction by one stage and dispatch (or finish it), with
    /// no stage outcome attached — the initial dispatch out of
    /// `Initializing` (spec §4.2). Waits for the readiness gate first.
    pub async fn transition(&self, transaction: Arc<Transaction>) -> Result<(), CoordinatorError> {
        self.advance(transaction, None, None).await
    }

    /// Apply a reply's outcome (or none, for a plain resume) and dispatch,
    /// waiting for the readiness gate first. The gated entry point every
    /// caller outside `recover`'s own replay loop goes through.
    async fn advance(
        &self,
        transaction: Arc<Transaction>,
        new_data: Option<Vec<u8>>,
        outcome: Option<bool>,
    ) -> Result<(), CoordinatorError> {
        self.wait_until_ready().await;
        self.advance_unready(transaction, new_data, outcome).await
    }

    /// `advance` without the readiness wait, for `recover`'s own replay —
    /// which runs before the gate opens and must not wait on itself.
    async fn advance_unready(
        &self,
        transaction: Arc<Transaction>,
        new_data: Option<Vec<u8>>,
        outcome: Option<bool>,
    ) -> Result<(), CoordinatorError> {
        let coordinator = self.clone();
        let transaction_for_dispatch = transaction.clone();
        let result = transaction
            .advance(new_data, outcome, move |step| {
                let coordinator = coordinator.clone();
                let transaction = transaction_for_dispatch.clone();
                async move { coordinator.dispatch(transaction, step).await }
            })
            .await;

        match result {
            Some(result) => result,
            None => {
                tracing::debug!(transaction = %transaction.id, "ignoring outcome for an already-settled transaction");
                Ok(())
            }
        }
    }

    /// Run under the transaction's own lock, held by `Transaction::advance`
    /// across this whole call (spec §5: commit and transition happen
    /// atomically). Persists the stepped state, cancels the stage's reply
    /// group, and either dispatches the next stage's `Request` or finishes
    /// the transaction off.
    async fn dispatch(&self, transaction: Arc<Transaction>, step: StepOutcome) -> Result<(), CoordinatorError> {
        self.0.cache.put_transaction(transaction.clone()).await?;
        self.0.hub.cancel_group(&transaction.id).await?;

        match step {
            StepOutcome::Dispatch { stage_topic, data } => {
                tracing::debug!(transaction = %transaction.id, stage = %stage_topic, "dispatching stage");

                let success_topic = success_reply_topic(&transaction.id, &stage_topic);
                let failure_topic = failure_reply_topic(&transaction.id, &stage_topic);

                self.subscribe_stage_replies(&transaction, &success_topic, &failure_topic)
                    .await?;

                let request = Request {
                    id: generate_id(),
                    transaction_id: transaction.id.clone(),
                    success_reply_topic: success_topic,
                    failure_reply_topic: failure_topic,
                    data,
                };
                self.0.hub.publish_request(&stage_topic, request).await?;
            }
            StepOutcome::Completed => {
                tracing::info!(transaction = %transaction.id, "transaction completed");
                transaction.recipe.decrement_active();
                self.0.cache.remove_transaction(&transaction).await?;
            }
        }

        Ok(())
    }

    async fn subscribe_stage_replies(
        &self,
        transaction: &Arc<Transaction>,
        success_topic: &str,
        failure_topic: &str,
    ) -> Result<(), CoordinatorError> {
        let group = transaction.id.clone();

        let coordinator = self.clone();
        let txn_ok = transaction.clone();
        self.0
            .hub
            .subscribe_reply(
                &group,
                success_topic,
                Box::new(move |reply| {
                    let coordinator = coordinator.clone();
                    let transaction = txn_ok.clone();
                    let new_data = (!reply.new_data.is_empty()).then_some(reply.new_data);
                    tokio::spawn(async move {
                        if let Err(err) = coordinator.advance(transaction, new_data, Some(true)).await {
                            tracing::error!(error = %err, "failed to transition after success reply");
                        }
                    });
                }),
            )
            .await?;

        let coordinator = self.clone();
        let txn_fail = transaction.clone();
        self.0
            .hub
            .subscribe_reply(
                &group,
                failure_topic,
                Box::new(move |_reply| {
                    let coordinator = coordinator.clone();
                    let transaction = txn_fail.clone();
                    tokio::spawn(async move {
                        if let Err(err) = coordinator.advance(transaction, None, Some(false)).await {
                            tracing::error!(error = %err, "failed to transition after failure reply");
                        }
                    });
                }),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::StorageError;
    use crate::hub::InMemoryHub;
    use crate::proto::Reply;
    use crate::recipe::{RecipeRecord, Stage};
    use crate::storage::InMemoryStorage;
    use crate::transaction::TransactionRecord;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    fn two_stage_recipe() -> Recipe {
        let mut stages = HashMap::new();
        stages.insert("charge".to_string(), Stage::with_rollback("ship", "refund"));
        stages.insert("ship".to_string(), Stage::terminal());
        Recipe::new("Order Flow", "order.created", "charge", stages)
    }

    async fn new_coordinator() -> (Coordinator, Arc<InMemoryHub>) {
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let hub = Arc::new(InMemoryHub::new());
        let coordinator = Coordinator::new(cache, hub.clone() as Arc<dyn Hub>);
        (coordinator, hub)
    }

    #[tokio::test]
    async fn trigger_dispatches_first_stage_request() {
        let (coordinator, hub) = new_coordinator().await;
        let recipe = coordinator.register(two_stage_recipe()).await.unwrap();

        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        hub.subscribe(
            "charge",
            Box::new(move |b| captured_clone.lock().unwrap().push(b.to_vec())),
        )
        .await
        .unwrap();

        hub.publish_raw(&recipe.triggered_by, Bytes::from_static(b"order-123"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(captured.lock().unwrap().len(), 1);
        assert_eq!(recipe.active_transactions(), 1);
    }

    #[tokio::test]
    async fn successful_replies_drive_transaction_to_completion() {
        let (coordinator, hub) = new_coordinator().await;
        let recipe = coordinator.register(two_stage_recipe()).await.unwrap();

        hub.publish_raw(&recipe.triggered_by, Bytes::from_static(b"payload"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recipe.active_transactions(), 1);

        // Drive the "charge" stage's success reply, then "ship"'s (terminal),
        // completing the transaction. The transaction id isn't known to the
        // test directly, so broadcast the reply to every in-flight
        // transaction's success topic by reading it back out of the cache.
        let txn = first_cached_transaction(&coordinator).await.expect("transaction in flight");
        let ok_topic = success_reply_topic(&txn.id, "charge");
        hub.publish_reply(&ok_topic, Reply { new_data: vec![] }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(txn.state().await, crate::transaction::TransactionState::Executing);

        let ok_topic = success_reply_topic(&txn.id, "ship");
        hub.publish_reply(&ok_topic, Reply { new_data: vec![] }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recipe.active_transactions(), 0);
    }

    async fn first_cached_transaction(coordinator: &Coordinator) -> Option<Arc<Transaction>> {
        let found = Arc::new(std::sync::Mutex::new(None));
        let found_clone = found.clone();
        coordinator
            .0
            .cache
            .for_each_transaction(Box::new(move |t| {
                let mut slot = found_clone.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(t.clone());
                }
                Ok(())
            }))
            .await
            .unwrap();
        let result = found.lock().unwrap().clone();
        result
    }

    #[tokio::test]
    async fn unload_recipe_then_clear_inactive_removes_it() {
        let (coordinator, _hub) = new_coordinator().await;
        let recipe = coordinator.register(two_stage_recipe()).await.unwrap();
        assert_eq!(recipe.status(), RecipeStatus::Active);

        coordinator.unload_recipe(&recipe.name).await.unwrap();
        assert_eq!(recipe.status(), RecipeStatus::Draining);

        coordinator.clear_inactive().await.unwrap();
        assert_eq!(recipe.status(), RecipeStatus::Inactive);
    }

    #[tokio::test]
    async fn unload_unknown_recipe_is_not_found() {
        let (coordinator, _hub) = new_coordinator().await;
        let err = coordinator.unload_recipe("missing").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    /// Wraps `InMemoryStorage`, delaying `load_active_transactions` so a
    /// test can fire a trigger into the middle of `recover`'s replay.
    struct DelayedStorage {
        inner: InMemoryStorage,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Storage for DelayedStorage {
        async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
            self.inner.save_transaction(transaction).await
        }

        async fn save_recipe(&self, recipe: &Recipe) -> Result<(), StorageError> {
            self.inner.save_recipe(recipe).await
        }

        async fn remove_recipe(&self, id: &str) -> Result<(), StorageError> {
            self.inner.remove_recipe(id).await
        }

        async fn load_all_recipes(&self) -> Result<Vec<RecipeRecord>, StorageError> {
            self.inner.load_all_recipes().await
        }

        async fn load_active_transactions(&self) -> Result<Vec<TransactionRecord>, StorageError> {
            tokio::time::sleep(self.delay).await;
            self.inner.load_active_transactions().await
        }
    }

    #[tokio::test]
    async fn trigger_during_recovery_does_not_dispatch_before_recovery_finishes() {
        let seed = InMemoryStorage::new();
        let mut stages = HashMap::new();
        stages.insert("charge".to_string(), Stage::terminal());
        let mut recipe = Recipe::new("Order Flow", "order.created", "charge", stages);
        recipe.id = "recipe-1".to_string();
        seed.save_recipe(&recipe).await.unwrap();
        let storage: Arc<dyn Storage> =
            Arc::new(DelayedStorage { inner: seed, delay: Duration::from_millis(50) });

        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let hub = Arc::new(InMemoryHub::new());

        let dispatched = Arc::new(std::sync::Mutex::new(Vec::new()));
        let dispatched_clone = dispatched.clone();
        hub.subscribe(
            "charge",
            Box::new(move |_| dispatched_clone.lock().unwrap().push(Instant::now())),
        )
        .await
        .unwrap();

        let start = Instant::now();
        let hub_for_recover: Arc<dyn Hub> = hub.clone();
        let recover_handle =
            tokio::spawn(async move { Coordinator::recover(cache, hub_for_recover, storage).await.unwrap() });

        // Give `recover` time to re-register the recipe's trigger
        // subscription (fast) but not to finish replaying transactions
        // (delayed 50ms), then fire a trigger straight into the gap.
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.publish_raw("order.created", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let _coordinator = recover_handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let dispatched = dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert!(
            dispatched[0].duration_since(start) >= Duration::from_millis(45),
            "trigger was dispatched before recovery's readiness gate opened"
        );
    }
}
