//! Transaction state machine (spec §4.1): a single in-flight run of a
//! `Recipe`, executing stages forward and, on failure, unwinding the
//! `executed_path` stack in LIFO order via each stage's rollback topic.
//!
//! Grounded on `examples/original_source/pkg/service/transactions.go`
//! (`Transaction`, `Commit`, `Step`, `ExecutedPath`) for the state machine
//! itself, translated from a `sync.Mutex`-guarded struct to a
//! `tokio::sync::Mutex`-guarded one the way `angzarr`'s `orchestration::saga`
//! guards its in-flight saga state.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::TransactionError;
use crate::recipe::Recipe;

/// Where a transaction sits in its forward/revert lifecycle (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Initializing,
    Executing,
    Reverting,
    Success,
    Failed,
}

impl TransactionState {
    /// Terminal states accept no further `step`/`commit` calls.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Success | TransactionState::Failed)
    }
}

/// Result of one `advance` step: either dispatch a `Request` to the next
/// stage's topic, or the transaction just reached a terminal state.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Dispatch { stage_topic: String, data: Vec<u8> },
    Completed,
}

/// Plain, serializable projection of a `Transaction`, mirrors `RecipeRecord`.
/// `recipe_id` replaces the `Arc<Recipe>` link: the recipe is looked up in
/// the cache on `from_record` rather than re-embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub recipe_id: String,
    pub data: Vec<u8>,
    pub stage_key: String,
    pub stage_topic: String,
    pub executed_path: Vec<String>,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    data: Vec<u8>,
    /// Key of the stage currently being executed/compensated, looked up in
    /// `recipe.stages`. Empty before the first `step()`.
    stage_key: String,
    /// Bus topic to publish a `Request` to for the current stage: the
    /// stage key itself when executing forward, `stage.rollback` when
    /// reverting.
    stage_topic: String,
    executed_path: Vec<String>,
    state: TransactionState,
    expires_at: Option<Instant>,
    expires_at_wall: Option<DateTime<Utc>>,
}

/// A running instance of a `Recipe`.
///
/// Held behind an `Arc` so the coordinator's reply-group closures and the
/// expiration scanner can share ownership without a second index; only the
/// mutable fields sit behind the `Mutex`, mirroring `angzarr`'s
/// `Arc<Mutex<SagaState>>` pattern for concurrently-observed saga state.
#[derive(Debug)]
pub struct Transaction {
    pub id: String,
    pub recipe: Arc<Recipe>,
    pub created_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

impl Transaction {
    /// Start a new transaction in `Initializing` state. The first call to
    /// `step()` advances it onto the recipe's `start_at` stage.
    pub fn new(id: impl Into<String>, recipe: Arc<Recipe>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            recipe,
            created_at: Utc::now(),
            inner: Mutex::new(Inner {
                data,
                stage_key: String::new(),
                stage_topic: String::new(),
                executed_path: Vec::new(),
                state: TransactionState::Initializing,
                expires_at: None,
                expires_at_wall: None,
            }),
        }
    }

    pub fn from_record(record: TransactionRecord, recipe: Arc<Recipe>) -> Self {
        Self {
            id: record.id,
            recipe,
            created_at: record.created_at,
            inner: Mutex::new(Inner {
                data: record.data,
                stage_key: record.stage_key,
                stage_topic: record.stage_topic,
                executed_path: record.executed_path,
                state: record.state,
                expires_at: None,
                expires_at_wall: record.expires_at,
            }),
        }
    }

    pub async fn to_record(&self) -> TransactionRecord {
        let inner = self.inner.lock().await;
        TransactionRecord {
            id: self.id.clone(),
            recipe_id: self.recipe.id.clone(),
            data: inner.data.clone(),
            stage_key: inner.stage_key.clone(),
            stage_topic: inner.stage_topic.clone(),
            executed_path: inner.executed_path.clone(),
            state: inner.state,
            created_at: self.created_at,
            expires_at: inner.expires_at_wall,
        }
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    pub async fn stage_topic(&self) -> String {
        self.inner.lock().await.stage_topic.clone()
    }

    pub async fn data(&self) -> Vec<u8> {
        self.inner.lock().await.data.clone()
    }

    pub async fn set_data(&self, data: Vec<u8>) {
        self.inner.lock().await.data = data;
    }

    pub async fn is_completed(&self) -> bool {
        self.inner.lock().await.state.is_terminal()
    }

    /// Snapshot of the forward path walked so far, most recent last.
    /// Empties back out as `step()` pops it during reversion.
    pub async fn executed_path(&self) -> Vec<String> {
        self.inner.lock().await.executed_path.clone()
    }

    /// Arm (or re-arm) the per-stage timeout. `Duration::ZERO` clears it
    /// (spec §4.1: a zero-duration stage timeout means "no deadline").
    async fn set_timeout_locked(inner: &mut Inner, timeout: Duration) {
        if timeout.is_zero() {
            inner.expires_at = None;
            inner.expires_at_wall = None;
        } else {
            inner.expires_at = Some(Instant::now() + timeout);
            inner.expires_at_wall =
                Some(Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_default());
        }
    }

    pub async fn is_expired(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Transition on receipt of a reply (spec §4.1/§4.3): `success = false`
    /// flips an `Executing` transaction into `Reverting`; a reply arriving
    /// while already `Reverting` (or a failure reply while `Initializing`,
    /// which cannot happen in practice) is a no-op beyond the completion
    /// check. Mirrors `Transaction.Commit` in the original implementation.
    ///
    /// Fails with `TransactionError::AlreadyCompleted` if the transaction
    /// already reached a terminal state — this is the guard on top of the
    /// hub's own once-guard, so a stray late reply is rejected even if it
    /// somehow slips past the reply group's finalizer.
    pub async fn commit(&self, success: bool) -> Result<(), TransactionError> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminal() {
            return Err(TransactionError::AlreadyCompleted(self.id.clone()));
        }

        if !success && inner.state == TransactionState::Executing {
            inner.state = TransactionState::Reverting;
        }

        Ok(())
    }

    /// Advance the state machine by one stage (spec §4.1). Returns the
    /// topic to dispatch a `Request` to, or `None` if the transaction just
    /// reached a terminal state. Mirrors `Transaction.Step`.
    pub async fn step(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        Self::step_locked(&self.recipe, &mut inner).await
    }

    /// The body of `step`, factored out so `advance` can run it under a
    /// guard it already holds rather than re-locking. Loops instead of
    /// recursing through the "no rollback defined, skip" case, the way
    /// `Transaction.Step` self-recurses in the original.
    async fn step_locked(recipe: &Recipe, inner: &mut Inner) -> Option<String> {
        loop {
            let mut done = false;
            let stage_key;

            match inner.state {
                TransactionState::Initializing => {
                    stage_key = recipe.start_at.clone();
                    inner.state = TransactionState::Executing;
                    inner.executed_path = vec![stage_key.clone()];
                }
                TransactionState::Executing => {
                    let current = inner.stage_key.clone();
                    let terminate = recipe
                        .stages
                        .get(&current)
                        .map(|s| s.terminate)
                        .unwrap_or(true);
                    if terminate {
                        done = true;
                        stage_key = String::new();
                    } else {
                        let next = recipe
                            .stages
                            .get(&current)
                            .map(|s| s.next.clone())
                            .unwrap_or_default();
                        inner.executed_path.push(next.clone());
                        stage_key = next;
                    }
                }
                TransactionState::Reverting => {
                    if inner.executed_path.is_empty() {
                        done = true;
                        stage_key = String::new();
                    } else {
                        stage_key = inner.executed_path.pop().unwrap();
                    }
                }
                TransactionState::Success | TransactionState::Failed => {
                    return None;
                }
            }

            if done {
                inner.state = if inner.state == TransactionState::Executing {
                    TransactionState::Success
                } else {
                    TransactionState::Failed
                };
                inner.stage_key.clear();
                inner.stage_topic.clear();
                inner.expires_at = None;
                inner.expires_at_wall = None;
                return None;
            }

            inner.stage_key = stage_key.clone();
            let stage = recipe.stages.get(&stage_key).cloned();

            match stage {
                Some(stage) => {
                    if inner.state == TransactionState::Reverting && stage.rollback.is_empty() {
                        // No compensation defined for this stage; skip straight
                        // to the next one in the stack.
                        continue;
                    }

                    inner.stage_topic = if inner.state == TransactionState::Reverting {
                        stage.rollback.clone()
                    } else {
                        stage_key.clone()
                    };

                    let timeout = if inner.state == TransactionState::Reverting {
                        stage.rollback_timeout
                    } else {
                        stage.timeout
                    };
                    Self::set_timeout_locked(inner, timeout).await;
                    return Some(inner.stage_topic.clone());
                }
                None => {
                    // Unknown stage key: nothing left to dispatch to.
                    inner.stage_topic.clear();
                    return None;
                }
            }
        }
    }

    /// Apply a stage outcome (if any), step the state machine, and run
    /// `dispatch` with the result, all under one continuous hold of the
    /// transaction's lock. Mirrors the original's `trx.Lock(); defer
    /// trx.Unlock()`, which wraps `Commit` and the caller's `transition`
    /// together rather than releasing the lock between them — without
    /// that, two racing outcomes for the same transaction (the expiration
    /// sweep and a late reply, say) could each read the pre-outcome state,
    /// decide independently, and step the machine twice.
    ///
    /// `new_data` and `outcome` mirror a reply's optional `new_data` and
    /// success/failure; pass `None` for a plain resume with no reply
    /// attached (the initial dispatch out of `Initializing`, or resuming a
    /// loaded transaction during recovery).
    ///
    /// Returns `None` without calling `dispatch` if `outcome` is given but
    /// the transaction already reached a terminal state — a redundant
    /// commit attempt on an already-settled transaction is a no-op, same
    /// as `Step` short-circuiting on `Success`/`Failed`.
    pub async fn advance<F, Fut, T>(
        &self,
        new_data: Option<Vec<u8>>,
        outcome: Option<bool>,
        dispatch: F,
    ) -> Option<T>
    where
        F: FnOnce(StepOutcome) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut inner = self.inner.lock().await;

        if let Some(data) = new_data {
            inner.data = data;
        }

        if let Some(success) = outcome {
            if inner.state.is_terminal() {
                return None;
            }
            if !success && inner.state == TransactionState::Executing {
                inner.state = TransactionState::Reverting;
            }
        }

        let next = Self::step_locked(&self.recipe, &mut inner).await;
        let step = match next {
            Some(stage_topic) => StepOutcome::Dispatch { stage_topic, data: inner.data.clone() },
            None => StepOutcome::Completed,
        };

        Some(dispatch(step).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{Recipe, Stage};
    use std::collections::HashMap;

    fn sample_recipe() -> Arc<Recipe> {
        let mut stages = HashMap::new();
        stages.insert("start".to_string(), Stage::with_rollback("end", "undo-start"));
        stages.insert("end".to_string(), Stage::terminal());
        let mut recipe = Recipe::new("Test Flow", "init-start", "start", stages);
        recipe.id = "recipe-1".to_string();
        Arc::new(recipe)
    }

    #[tokio::test]
    async fn first_step_moves_from_initializing_to_start_stage() {
        let txn = Transaction::new("txn-1", sample_recipe(), b"payload".to_vec());
        let topic = txn.step().await;
        assert_eq!(topic, Some("start".to_string()));
        assert_eq!(txn.state().await, TransactionState::Executing);
    }

    #[tokio::test]
    async fn reaching_terminal_stage_succeeds() {
        let txn = Transaction::new("txn-1", sample_recipe(), b"payload".to_vec());
        txn.step().await; // -> start
        txn.commit(true).await.unwrap();
        let topic = txn.step().await; // -> end
        assert_eq!(topic, Some("end".to_string()));
        txn.commit(true).await.unwrap();
        let topic = txn.step().await; // terminate -> Success
        assert_eq!(topic, None);
        assert_eq!(txn.state().await, TransactionState::Success);
    }

    #[tokio::test]
    async fn failure_reverts_and_unwinds_executed_path() {
        let txn = Transaction::new("txn-1", sample_recipe(), b"payload".to_vec());
        txn.step().await; // -> start, executed_path = [start]
        txn.commit(false).await.unwrap(); // still Executing -> no-op (Initializing already consumed)
        txn.step().await; // -> end, executed_path = [start, end]
        txn.commit(false).await.unwrap(); // Executing -> Reverting
        let topic = txn.step().await; // pop "end", but "end" has no rollback -> skip to "start"
        assert_eq!(topic, Some("undo-start".to_string()));
        assert_eq!(txn.state().await, TransactionState::Reverting);
        txn.commit(false).await.unwrap();
        let topic = txn.step().await; // executed_path empty -> Failed
        assert_eq!(topic, None);
        assert_eq!(txn.state().await, TransactionState::Failed);
    }

    #[tokio::test]
    async fn commit_rejects_after_terminal_state() {
        let txn = Transaction::new("txn-1", sample_recipe(), b"payload".to_vec());
        txn.step().await;
        txn.commit(true).await.unwrap();
        txn.step().await;
        txn.commit(true).await.unwrap();
        txn.step().await; // now Success
        assert!(txn.commit(true).await.is_err());
    }

    #[tokio::test]
    async fn timeout_expires_after_duration_elapses() {
        let mut stages = HashMap::new();
        stages.insert(
            "start".to_string(),
            Stage::with_rollback("end", "undo-start").with_timeout(Duration::from_millis(1)),
        );
        stages.insert("end".to_string(), Stage::terminal());
        let mut recipe = Recipe::new("Test Flow", "init-start", "start", stages);
        recipe.id = "recipe-2".to_string();

        let txn = Transaction::new("txn-2", Arc::new(recipe), b"payload".to_vec());
        txn.step().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(txn.is_expired().await);
    }

    #[tokio::test]
    async fn no_timeout_never_expires() {
        let txn = Transaction::new("txn-1", sample_recipe(), b"payload".to_vec());
        assert!(!txn.is_expired().await);
    }
}
