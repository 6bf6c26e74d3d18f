//! Durable sqlite `Storage`, supplementing
//! `examples/original_source/pkg/service/storage.go`'s in-memory-only
//! `DebugStorage` with the actual durable backend spec §4.6 requires
//! ("persists recipe/transaction state to survive process restarts").
//! Uses `sqlx` the way `angzarr`'s storage layer uses it for its own
//! event-store persistence, JSON-encoding the `RecipeRecord`/
//! `TransactionRecord` DTOs into a single payload column rather than
//! normalizing every field — the records are small and read back whole.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::Storage;
use crate::error::StorageError;
use crate::recipe::{Recipe, RecipeRecord};
use crate::transaction::{Transaction, TransactionRecord};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(StorageError::Sqlite)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recipes (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StorageError::Sqlite)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StorageError::Sqlite)?;

        tracing::info!(path, "sqlite storage ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        let record = transaction.to_record().await;
        let payload = serde_json::to_string(&record)?;
        let state = format!("{:?}", record.state);
        sqlx::query(
            "INSERT INTO transactions (id, state, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, payload = excluded.payload",
        )
        .bind(&record.id)
        .bind(state)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Sqlite)?;
        Ok(())
    }

    async fn save_recipe(&self, recipe: &Recipe) -> Result<(), StorageError> {
        let record = recipe.to_record();
        let payload = serde_json::to_string(&record)?;
        sqlx::query(
            "INSERT INTO recipes (id, payload) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
        )
        .bind(&record.id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Sqlite)?;
        Ok(())
    }

    async fn remove_recipe(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM recipes WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Sqlite)?;
        Ok(())
    }

    async fn load_all_recipes(&self) -> Result<Vec<RecipeRecord>, StorageError> {
        let rows = sqlx::query("SELECT payload FROM recipes")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Sqlite)?;

        rows.into_iter()
            .map(|row| {
                let payload: String = row.get("payload");
                serde_json::from_str(&payload).map_err(StorageError::from)
            })
            .collect()
    }

    async fn load_active_transactions(&self) -> Result<Vec<TransactionRecord>, StorageError> {
        let rows = sqlx::query("SELECT payload FROM transactions WHERE state NOT IN ('Success', 'Failed')")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Sqlite)?;

        rows.into_iter()
            .map(|row| {
                let payload: String = row.get("payload");
                serde_json::from_str(&payload).map_err(StorageError::from)
            })
            .collect()
    }
}
