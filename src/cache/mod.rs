//! `Cache` is the runtime-authoritative store of recipes and transactions:
//! every read the coordinator does goes through it, never through
//! `Storage` directly (spec §4.6).
//!
//! Grounded on `examples/original_source/pkg/service/cache.go`
//! (`CacheService`, `WriteThruCache`, `InMemoryCache` over `go-memdb`).
//! `TransactAll`'s closure parameter is boxed rather than generic so the
//! trait stays object-safe (`dyn Cache`), following the same boxed-closure
//! pattern `angzarr`'s `EventBus::subscribe` uses for handler parameters.

pub mod memory;
pub mod write_through;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::recipe::Recipe;
use crate::transaction::Transaction;

pub use memory::InMemoryCache;
pub use write_through::WriteThroughCache;

/// A predicate/visitor applied to every cached transaction by `for_each_transaction`.
pub type TransactionVisitor = Box<dyn Fn(&Arc<Transaction>) -> Result<(), CacheError> + Send + Sync>;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn put_recipe(&self, recipe: Arc<Recipe>) -> Result<(), CacheError>;

    /// Look up the currently `Active` recipe by name (spec §4.2: recipe
    /// names are unique only among `Active` recipes).
    async fn get_recipe_by_name(&self, name: &str) -> Result<Option<Arc<Recipe>>, CacheError>;

    async fn get_recipe_by_id(&self, id: &str) -> Result<Option<Arc<Recipe>>, CacheError>;

    async fn remove_recipe(&self, recipe: &Recipe) -> Result<(), CacheError>;

    /// Drop a recipe's by-name lookup while keeping it addressable by id
    /// (spec §4.5: a `Draining` recipe must stop being found by new
    /// triggers but stay resolvable for in-flight transactions and
    /// `clear_inactive`'s later full removal).
    async fn retire_from_name_index(&self, name: &str) -> Result<(), CacheError>;

    async fn all_recipes(&self) -> Result<Vec<Arc<Recipe>>, CacheError>;

    async fn put_transaction(&self, transaction: Arc<Transaction>) -> Result<(), CacheError>;

    async fn get_transaction(&self, id: &str) -> Result<Option<Arc<Transaction>>, CacheError>;

    async fn remove_transaction(&self, transaction: &Transaction) -> Result<(), CacheError>;

    /// Visit every cached transaction, mirroring Go's `TransactAll`. Used by
    /// the expiration scanner (spec §4.4) to avoid a per-transaction timer.
    async fn for_each_transaction(&self, visitor: TransactionVisitor) -> Result<(), CacheError>;
}
