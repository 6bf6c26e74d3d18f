//! Write-through wrapper: mirrors every mutation to `Storage` on a spawned
//! task so the durable write never blocks the caller, exactly as
//! `examples/original_source/pkg/service/cache.go`'s `WriteThruCache` fires
//! `go func(...)` around each `Storage.*` call and returns the in-memory
//! result regardless of how the background write turns out.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Cache, TransactionVisitor};
use crate::error::CacheError;
use crate::recipe::Recipe;
use crate::storage::Storage;
use crate::transaction::Transaction;

/// Wraps an inner `Cache` and mirrors writes to a `Storage` backend
/// fire-and-forget. Reads are served entirely from the inner cache.
pub struct WriteThroughCache<C: Cache> {
    inner: C,
    storage: Arc<dyn Storage>,
}

impl<C: Cache> WriteThroughCache<C> {
    pub fn new(inner: C, storage: Arc<dyn Storage>) -> Self {
        Self { inner, storage }
    }
}

#[async_trait]
impl<C: Cache> Cache for WriteThroughCache<C> {
    async fn put_recipe(&self, recipe: Arc<Recipe>) -> Result<(), CacheError> {
        let storage = self.storage.clone();
        let recipe_for_storage = recipe.clone();
        tokio::spawn(async move {
            if let Err(err) = storage.save_recipe(&recipe_for_storage).await {
                tracing::warn!(error = %err, recipe = %recipe_for_storage.id, "failed to persist recipe");
            }
        });
        self.inner.put_recipe(recipe).await
    }

    async fn get_recipe_by_name(&self, name: &str) -> Result<Option<Arc<Recipe>>, CacheError> {
        self.inner.get_recipe_by_name(name).await
    }

    async fn get_recipe_by_id(&self, id: &str) -> Result<Option<Arc<Recipe>>, CacheError> {
        self.inner.get_recipe_by_id(id).await
    }

    async fn remove_recipe(&self, recipe: &Recipe) -> Result<(), CacheError> {
        let storage = self.storage.clone();
        let id = recipe.id.clone();
        tokio::spawn(async move {
            if let Err(err) = storage.remove_recipe(&id).await {
                tracing::warn!(error = %err, recipe = %id, "failed to remove persisted recipe");
            }
        });
        self.inner.remove_recipe(recipe).await
    }

    async fn retire_from_name_index(&self, name: &str) -> Result<(), CacheError> {
        self.inner.retire_from_name_index(name).await
    }

    async fn all_recipes(&self) -> Result<Vec<Arc<Recipe>>, CacheError> {
        self.inner.all_recipes().await
    }

    async fn put_transaction(&self, transaction: Arc<Transaction>) -> Result<(), CacheError> {
        let storage = self.storage.clone();
        let transaction_for_storage = transaction.clone();
        tokio::spawn(async move {
            if let Err(err) = storage.save_transaction(&transaction_for_storage).await {
                tracing::warn!(error = %err, transaction = %transaction_for_storage.id, "failed to persist transaction");
            }
        });
        self.inner.put_transaction(transaction).await
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<Arc<Transaction>>, CacheError> {
        self.inner.get_transaction(id).await
    }

    async fn remove_transaction(&self, transaction: &Transaction) -> Result<(), CacheError> {
        self.inner.remove_transaction(transaction).await
    }

    async fn for_each_transaction(&self, visitor: TransactionVisitor) -> Result<(), CacheError> {
        self.inner.for_each_transaction(visitor).await
    }
}
