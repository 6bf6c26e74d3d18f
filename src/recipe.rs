//! Recipe (a.k.a. workflow): the immutable stage graph plus the mutable
//! status/ref-count every running `Transaction` is checked out against.
//!
//! Grounded on `examples/original_source/pkg/service/transactions.go`
//! (`Workflow`/`Stage`) for the shape, generalized per spec §3/§4.2 for the
//! Active/Draining/Inactive lifecycle and the atomic ref-count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Static description of one node in a recipe's stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Name of the next forward stage. Empty if `terminate`.
    pub next: String,
    /// Topic of the compensating action. Empty means "skip on revert".
    pub rollback: String,
    /// Forward-phase deadline. Zero means "no timeout".
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Deadline for the compensating action.
    #[serde(with = "duration_secs")]
    pub rollback_timeout: Duration,
    /// When true, reaching this stage successfully completes the saga.
    pub terminate: bool,
}

impl Stage {
    /// Convenience constructor for a forward-only stage with no rollback.
    pub fn forward(next: impl Into<String>) -> Self {
        Self {
            next: next.into(),
            rollback: String::new(),
            timeout: Duration::ZERO,
            rollback_timeout: Duration::ZERO,
            terminate: false,
        }
    }

    /// Convenience constructor for a forward stage with a rollback topic.
    pub fn with_rollback(next: impl Into<String>, rollback: impl Into<String>) -> Self {
        Self {
            next: next.into(),
            rollback: rollback.into(),
            timeout: Duration::ZERO,
            rollback_timeout: Duration::ZERO,
            terminate: false,
        }
    }

    /// Convenience constructor for the terminal stage.
    pub fn terminal() -> Self {
        Self {
            next: String::new(),
            rollback: String::new(),
            timeout: Duration::ZERO,
            rollback_timeout: Duration::ZERO,
            terminate: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }
}

/// Recipe status, atomically mutable (spec §3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipeStatus {
    Active,
    Draining,
    Inactive,
}

impl RecipeStatus {
    fn to_u8(self) -> u8 {
        match self {
            RecipeStatus::Active => 0,
            RecipeStatus::Draining => 1,
            RecipeStatus::Inactive => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => RecipeStatus::Active,
            1 => RecipeStatus::Draining,
            _ => RecipeStatus::Inactive,
        }
    }
}

/// A named workflow: an immutable stage graph plus mutable runtime state.
///
/// `id` is unique and generated on registration. `name` is unique only
/// among recipes that are currently `Active` (spec §3) — a Draining recipe
/// may coexist with a new Active recipe of the same name during hot-swap.
#[derive(Debug)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub triggered_by: String,
    pub start_at: String,
    pub stages: HashMap<String, Stage>,
    status: AtomicU8,
    num_active_transactions: AtomicU64,
}

/// Plain, serializable projection of a `Recipe` for the durable store.
/// `AtomicU8`/`AtomicU64` aren't `Serialize`, so this is the narrow seam
/// between runtime state and storage, mirrored by `Transaction`/
/// `TransactionRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub id: String,
    pub name: String,
    pub triggered_by: String,
    pub start_at: String,
    pub stages: HashMap<String, Stage>,
    pub status: RecipeStatus,
    pub num_active_transactions: u64,
}

impl Recipe {
    /// Build a recipe draft. `id` is empty until `Coordinator::register`
    /// assigns one (spec §4.2 step 1).
    pub fn new(
        name: impl Into<String>,
        triggered_by: impl Into<String>,
        start_at: impl Into<String>,
        stages: HashMap<String, Stage>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            triggered_by: triggered_by.into(),
            start_at: start_at.into(),
            stages,
            status: AtomicU8::new(RecipeStatus::Active.to_u8()),
            num_active_transactions: AtomicU64::new(0),
        }
    }

    pub fn from_record(record: RecipeRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            triggered_by: record.triggered_by,
            start_at: record.start_at,
            stages: record.stages,
            status: AtomicU8::new(record.status.to_u8()),
            num_active_transactions: AtomicU64::new(record.num_active_transactions),
        }
    }

    pub fn to_record(&self) -> RecipeRecord {
        RecipeRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            triggered_by: self.triggered_by.clone(),
            start_at: self.start_at.clone(),
            stages: self.stages.clone(),
            status: self.status(),
            num_active_transactions: self.active_transactions(),
        }
    }

    pub fn status(&self) -> RecipeStatus {
        RecipeStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn set_status(&self, status: RecipeStatus) {
        self.status.store(status.to_u8(), Ordering::SeqCst);
    }

    /// Atomically transition status, succeeding only if the current status
    /// matches `current`. Used for the Active<->Draining race in
    /// `UnloadRecipe` (spec §4.5) and `ClearInactive` (spec §4.5).
    pub fn compare_and_swap_status(&self, current: RecipeStatus, new: RecipeStatus) -> bool {
        self.status
            .compare_exchange(
                current.to_u8(),
                new.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn active_transactions(&self) -> u64 {
        self.num_active_transactions.load(Ordering::SeqCst)
    }

    pub fn increment_active(&self) -> u64 {
        self.num_active_transactions.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn decrement_active(&self) -> u64 {
        self.num_active_transactions
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1)
    }
}

/// Generate a recipe id. Grounded on `angzarr`'s use of `uuid::Uuid::new_v4`
/// for entity identifiers throughout its proto types.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
