//! In-process `Storage`, grounded on
//! `examples/original_source/pkg/service/storage.go`'s `DebugStorage` (a
//! `go-memdb` instance pre-seeded for tests/demos). Useful with
//! `memory-storage` when no durable backend is configured, or standalone
//! in tests as the write-through target.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Storage;
use crate::error::StorageError;
use crate::recipe::{Recipe, RecipeRecord};
use crate::transaction::{Transaction, TransactionRecord};

#[derive(Default)]
struct Tables {
    recipes: HashMap<String, RecipeRecord>,
    transactions: HashMap<String, TransactionRecord>,
}

pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        tracing::info!("in-memory storage ready");
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Pre-seed storage with known recipes/transactions, mirroring
    /// `NewDebugStorage`'s pre-insertion loop.
    pub fn seeded(recipes: Vec<RecipeRecord>, transactions: Vec<TransactionRecord>) -> Self {
        let mut tables = Tables::default();
        for recipe in recipes {
            tracing::info!(recipe = %recipe.id, "pre-inserting recipe");
            tables.recipes.insert(recipe.id.clone(), recipe);
        }
        for transaction in transactions {
            tracing::info!(transaction = %transaction.id, "pre-inserting transaction");
            tables.transactions.insert(transaction.id.clone(), transaction);
        }
        tracing::info!("in-memory storage ready");
        Self {
            tables: RwLock::new(tables),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        let record = transaction.to_record().await;
        self.tables.write().await.transactions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn save_recipe(&self, recipe: &Recipe) -> Result<(), StorageError> {
        let record = recipe.to_record();
        self.tables.write().await.recipes.insert(record.id.clone(), record);
        Ok(())
    }

    async fn remove_recipe(&self, id: &str) -> Result<(), StorageError> {
        self.tables.write().await.recipes.remove(id);
        Ok(())
    }

    async fn load_all_recipes(&self) -> Result<Vec<RecipeRecord>, StorageError> {
        Ok(self.tables.read().await.recipes.values().cloned().collect())
    }

    async fn load_active_transactions(&self) -> Result<Vec<TransactionRecord>, StorageError> {
        use crate::transaction::TransactionState;
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .values()
            .filter(|t| !matches!(t.state, TransactionState::Success | TransactionState::Failed))
            .cloned()
            .collect())
    }
}
