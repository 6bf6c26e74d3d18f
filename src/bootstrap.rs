//! Backend selection from `Config`, grounded on `angzarr`'s
//! `storage::init_storage` — a small dispatcher that turns a config enum
//! into the matching trait object, so the embedding binary never matches
//! on `HubProviderKind`/`storage.driver` itself.

use std::sync::Arc;

use crate::cache::{Cache, InMemoryCache, WriteThroughCache};
use crate::config::{Config, HubProviderKind};
use crate::error::{CoordinatorError, HubError, StorageError};
use crate::hub::{Hub, InMemoryHub};
use crate::storage::{InMemoryStorage, Storage};

/// Build the `Hub` backend selected by `config.hub_provider`.
pub async fn init_hub(config: &Config) -> Result<Arc<dyn Hub>, HubError> {
    match config.hub_provider.provider {
        HubProviderKind::InMemory => Ok(Arc::new(InMemoryHub::new())),
        HubProviderKind::Streaming => {
            #[cfg(feature = "streaming-hub")]
            {
                let hub = crate::hub::StreamingHub::connect(&config.hub_provider.streaming).await?;
                Ok(Arc::new(hub))
            }
            #[cfg(not(feature = "streaming-hub"))]
            {
                Err(HubError::Backend(
                    "streaming hub requested but crate was built without the streaming-hub feature".to_string(),
                ))
            }
        }
    }
}

/// Build the `Storage` backend selected by `config.storage.driver`.
pub async fn init_storage(config: &Config) -> Result<Arc<dyn Storage>, StorageError> {
    match config.storage.driver.as_str() {
        "memory" => Ok(Arc::new(InMemoryStorage::new())),
        "sqlite" => {
            #[cfg(feature = "sqlite-storage")]
            {
                let storage = crate::storage::SqliteStorage::connect(&config.storage.path).await?;
                Ok(Arc::new(storage))
            }
            #[cfg(not(feature = "sqlite-storage"))]
            {
                Err(StorageError::Backend(
                    "sqlite storage requested but crate was built without the sqlite-storage feature".to_string(),
                ))
            }
        }
        other => Err(StorageError::Backend(format!("unknown storage driver: {other}"))),
    }
}

/// Build the write-through `Cache` over a freshly built `Storage` backend,
/// the combination every embedding binary wants (spec §4.6).
pub async fn init_cache(config: &Config) -> Result<(Arc<dyn Cache>, Arc<dyn Storage>), CoordinatorError> {
    let storage = init_storage(config).await?;
    let cache: Arc<dyn Cache> = Arc::new(WriteThroughCache::new(InMemoryCache::new(), storage.clone()));
    Ok((cache, storage))
}
