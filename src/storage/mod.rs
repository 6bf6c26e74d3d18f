//! `Storage` is the durable backend the write-through cache mirrors onto;
//! it is never read from at request time, only at startup recovery
//! (spec §4.6). Grounded on
//! `examples/original_source/pkg/service/storage.go` (`StorageService`).

pub mod memory;
#[cfg(feature = "sqlite-storage")]
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::recipe::RecipeRecord;
use crate::transaction::TransactionRecord;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite-storage")]
pub use sqlite::SqliteStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_transaction(&self, transaction: &crate::transaction::Transaction) -> Result<(), StorageError>;

    async fn save_recipe(&self, recipe: &crate::recipe::Recipe) -> Result<(), StorageError>;

    async fn remove_recipe(&self, id: &str) -> Result<(), StorageError>;

    async fn load_all_recipes(&self) -> Result<Vec<RecipeRecord>, StorageError>;

    /// Only transactions that have not yet reached `Success`/`Failed`
    /// (spec §4.6: recovery re-hydrates in-flight work, not history).
    async fn load_active_transactions(&self) -> Result<Vec<TransactionRecord>, StorageError>;
}
