//! Shared harness for the saga coordinator's integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use sake::cache::{Cache, InMemoryCache};
use sake::hub::{success_reply_topic, Hub, InMemoryHub};
use sake::proto::Reply;
use sake::recipe::{Recipe, Stage};
use sake::Coordinator;

/// Build a coordinator wired to fresh in-memory cache/hub, and return the
/// hub alongside it so tests can drive stage replies directly.
pub async fn coordinator() -> (Coordinator, Arc<InMemoryHub>) {
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
    let hub = Arc::new(InMemoryHub::new());
    let coordinator = Coordinator::new(cache, hub.clone() as Arc<dyn Hub>);
    (coordinator, hub)
}

/// A three-stage recipe: `reserve` -> `charge` -> `ship` (terminal), each
/// with a named compensation except the terminal stage.
pub fn three_stage_recipe(triggered_by: &str) -> Recipe {
    let mut stages = HashMap::new();
    stages.insert("reserve".to_string(), Stage::with_rollback("charge", "release"));
    stages.insert("charge".to_string(), Stage::with_rollback("ship", "refund"));
    stages.insert("ship".to_string(), Stage::terminal());
    Recipe::new("Order Saga", triggered_by, "reserve", stages)
}

/// Wait for the given predicate to become true, polling briefly. Avoids
/// guessing a single fixed sleep duration for async fan-out to settle.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(predicate(), "condition did not become true in time");
}

/// Same as `wait_until`, for predicates that need to await (e.g. reading a
/// `Transaction`'s state through its async accessors).
pub async fn wait_until_async<F, Fut>(mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if predicate().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(predicate().await, "condition did not become true in time");
}

/// Locate the single in-flight transaction for a recipe by scanning the
/// cache. Tests only ever have at most one transaction in flight at a
/// time, so "first seen" is deterministic enough for assertions.
pub async fn in_flight_transaction(cache: &Arc<dyn Cache>) -> Option<Arc<sake::Transaction>> {
    let found = Arc::new(std::sync::Mutex::new(None));
    let found_clone = found.clone();
    cache
        .for_each_transaction(Box::new(move |t| {
            let mut slot = found_clone.lock().unwrap();
            if slot.is_none() {
                *slot = Some(t.clone());
            }
            Ok(())
        }))
        .await
        .unwrap();
    let result = found.lock().unwrap().clone();
    result
}

pub fn ok_reply() -> Reply {
    Reply { new_data: vec![] }
}

pub async fn send_success(hub: &InMemoryHub, transaction_id: &str, stage: &str) {
    let topic = success_reply_topic(transaction_id, stage);
    hub.publish_reply(&topic, ok_reply()).await.unwrap();
}
