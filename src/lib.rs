//! Saga coordinator: drives multi-stage business transactions over a
//! pub/sub bus, executing a recipe's stages forward and unwinding them in
//! LIFO order via compensating actions on failure.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod logging;
pub mod recipe;
pub mod storage;
pub mod supervisor;
pub mod tasks;
pub mod transaction;

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/sake.rs"));
}

pub use cache::Cache;
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::CoordinatorError;
pub use hub::Hub;
pub use recipe::{Recipe, Stage};
pub use storage::Storage;
pub use transaction::{Transaction, TransactionState};

/// Crate version, mirroring `version.go`'s `sake v<version>` banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
