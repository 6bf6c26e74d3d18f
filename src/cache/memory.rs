//! In-memory `Cache`, keyed the way `go-memdb`'s schema in
//! `examples/original_source/pkg/service/cache.go` keys its two tables:
//! recipes by `name`, transactions by `id`. A second by-id index on
//! recipes is added since Rust callers address recipes by id once
//! registered (spec §4.2), not just by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Cache, TransactionVisitor};
use crate::error::CacheError;
use crate::recipe::Recipe;
use crate::transaction::Transaction;

#[derive(Default)]
struct Tables {
    recipes_by_name: HashMap<String, Arc<Recipe>>,
    recipes_by_id: HashMap<String, Arc<Recipe>>,
    transactions: HashMap<String, Arc<Transaction>>,
}

/// `go-memdb`-equivalent in-process store, guarded by a single `RwLock`
/// rather than memdb's copy-on-write MVCC — the coordinator holds this
/// behind an `Arc` and the read/write split is enough concurrency for the
/// access pattern (many reads from reply handlers, occasional writes).
pub struct InMemoryCache {
    tables: RwLock<Tables>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        tracing::info!("in-memory cache ready");
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn put_recipe(&self, recipe: Arc<Recipe>) -> Result<(), CacheError> {
        let mut tables = self.tables.write().await;
        tables.recipes_by_name.insert(recipe.name.clone(), recipe.clone());
        tables.recipes_by_id.insert(recipe.id.clone(), recipe);
        Ok(())
    }

    async fn get_recipe_by_name(&self, name: &str) -> Result<Option<Arc<Recipe>>, CacheError> {
        Ok(self.tables.read().await.recipes_by_name.get(name).cloned())
    }

    async fn get_recipe_by_id(&self, id: &str) -> Result<Option<Arc<Recipe>>, CacheError> {
        Ok(self.tables.read().await.recipes_by_id.get(id).cloned())
    }

    async fn remove_recipe(&self, recipe: &Recipe) -> Result<(), CacheError> {
        let mut tables = self.tables.write().await;
        tables.recipes_by_name.remove(&recipe.name);
        tables.recipes_by_id.remove(&recipe.id);
        Ok(())
    }

    async fn retire_from_name_index(&self, name: &str) -> Result<(), CacheError> {
        self.tables.write().await.recipes_by_name.remove(name);
        Ok(())
    }

    async fn all_recipes(&self) -> Result<Vec<Arc<Recipe>>, CacheError> {
        Ok(self.tables.read().await.recipes_by_id.values().cloned().collect())
    }

    async fn put_transaction(&self, transaction: Arc<Transaction>) -> Result<(), CacheError> {
        let mut tables = self.tables.write().await;
        tables.transactions.insert(transaction.id.clone(), transaction);
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Arc<Transaction>>, CacheError> {
        Ok(self.tables.read().await.transactions.get(id).cloned())
    }

    async fn remove_transaction(&self, transaction: &Transaction) -> Result<(), CacheError> {
        let mut tables = self.tables.write().await;
        tables.transactions.remove(&transaction.id);
        Ok(())
    }

    async fn for_each_transaction(&self, visitor: TransactionVisitor) -> Result<(), CacheError> {
        let transactions: Vec<Arc<Transaction>> =
            self.tables.read().await.transactions.values().cloned().collect();
        for transaction in &transactions {
            visitor(transaction)?;
        }
        Ok(())
    }
}
