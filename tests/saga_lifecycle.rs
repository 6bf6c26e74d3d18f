//! End-to-end saga flows driven entirely through the public `Coordinator`
//! and `Hub` surface, no internal module access.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use sake::hub::{failure_reply_topic, success_reply_topic, Hub};
use sake::recipe::{Recipe, Stage};
use sake::transaction::TransactionState;

use common::{coordinator, in_flight_transaction, ok_reply, three_stage_recipe, wait_until, wait_until_async};

#[tokio::test]
async fn single_terminal_stage_completes_on_first_reply() {
    let (coordinator, hub) = coordinator().await;

    let mut stages = HashMap::new();
    stages.insert("notify".to_string(), Stage::terminal());
    let recipe = coordinator
        .register(Recipe::new("Notify Only", "notify.trigger", "notify", stages))
        .await
        .unwrap();

    hub.publish_raw(&recipe.triggered_by, Bytes::from_static(b"hi"))
        .await
        .unwrap();
    wait_until(|| recipe.active_transactions() == 1).await;

    let txn = in_flight_transaction(coordinator.cache()).await.unwrap();
    let ok_topic = success_reply_topic(&txn.id, "notify");
    hub.publish_reply(&ok_topic, ok_reply()).await.unwrap();

    wait_until(|| recipe.active_transactions() == 0).await;
}

#[tokio::test]
async fn three_stage_saga_walks_every_stage_on_success() {
    let (coordinator, hub) = coordinator().await;
    let recipe = coordinator.register(three_stage_recipe("order.created")).await.unwrap();

    hub.publish_raw(&recipe.triggered_by, Bytes::from_static(b"order-1"))
        .await
        .unwrap();
    wait_until(|| recipe.active_transactions() == 1).await;

    let txn = in_flight_transaction(coordinator.cache()).await.unwrap();

    for stage in ["reserve", "charge", "ship"] {
        let topic = success_reply_topic(&txn.id, stage);
        hub.publish_reply(&topic, ok_reply()).await.unwrap();
        wait_until_async(|| async {
            stage == "ship" || txn.state().await == TransactionState::Executing
        })
        .await;
    }

    wait_until(|| recipe.active_transactions() == 0).await;
    assert_eq!(txn.state().await, TransactionState::Success);
}

#[tokio::test]
async fn failure_at_last_stage_unwinds_every_compensation_in_lifo_order() {
    let (coordinator, hub) = coordinator().await;
    let recipe = coordinator.register(three_stage_recipe("order.created")).await.unwrap();

    hub.publish_raw(&recipe.triggered_by, Bytes::from_static(b"order-2"))
        .await
        .unwrap();
    wait_until(|| recipe.active_transactions() == 1).await;
    let txn = in_flight_transaction(coordinator.cache()).await.unwrap();

    // Drive "reserve" and "charge" forward successfully.
    hub.publish_reply(&success_reply_topic(&txn.id, "reserve"), ok_reply())
        .await
        .unwrap();
    wait_until_async(|| async { txn.executed_path().await.len() == 2 }).await;

    hub.publish_reply(&success_reply_topic(&txn.id, "charge"), ok_reply())
        .await
        .unwrap();
    wait_until_async(|| async { txn.executed_path().await.len() == 3 }).await;

    // "ship" fails: the saga must unwind charge's and reserve's
    // compensations in reverse order before settling into Failed.
    let recorded = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorded_release = recorded.clone();
    let recorded_refund = recorded.clone();
    hub.subscribe(
        "release",
        Box::new(move |_| recorded_release.lock().unwrap().push("release")),
    )
    .await
    .unwrap();
    hub.subscribe(
        "refund",
        Box::new(move |_| recorded_refund.lock().unwrap().push("refund")),
    )
    .await
    .unwrap();

    hub.publish_reply(&failure_reply_topic(&txn.id, "ship"), ok_reply())
        .await
        .unwrap();

    // "refund" (charge's compensation) is dispatched first; replying to it
    // successfully then dispatches "release" (reserve's compensation).
    wait_until(|| recorded.lock().unwrap().contains(&"refund")).await;
    hub.publish_reply(&success_reply_topic(&txn.id, "refund"), ok_reply())
        .await
        .unwrap();

    wait_until(|| recorded.lock().unwrap().contains(&"release")).await;
    hub.publish_reply(&success_reply_topic(&txn.id, "release"), ok_reply())
        .await
        .unwrap();

    wait_until(|| recipe.active_transactions() == 0).await;
    assert_eq!(txn.state().await, TransactionState::Failed);
    assert_eq!(&*recorded.lock().unwrap(), &["refund", "release"]);
}

#[tokio::test]
async fn revert_skips_stages_with_no_compensation_defined() {
    let (coordinator, hub) = coordinator().await;

    // "first" has no rollback; a failure after "second" must unwind through
    // "second"'s compensation, then skip straight past "first" to Failed.
    let mut stages = HashMap::new();
    stages.insert("first".to_string(), Stage::forward("second"));
    stages.insert("second".to_string(), Stage::with_rollback("third", "undo_second"));
    stages.insert("third".to_string(), Stage::terminal());
    let recipe = coordinator
        .register(Recipe::new("Skip Compensation", "skip.trigger", "first", stages))
        .await
        .unwrap();

    hub.publish_raw(&recipe.triggered_by, Bytes::from_static(b"payload"))
        .await
        .unwrap();
    wait_until(|| recipe.active_transactions() == 1).await;
    let txn = in_flight_transaction(coordinator.cache()).await.unwrap();

    hub.publish_reply(&success_reply_topic(&txn.id, "first"), ok_reply())
        .await
        .unwrap();
    wait_until_async(|| async { txn.executed_path().await.len() == 2 }).await;

    // "second" fails: only "undo_second" should ever be dispatched, and
    // once it succeeds the transaction should go straight to Failed without
    // any compensation ever being requested for "first".
    let undo_seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let undo_seen_clone = undo_seen.clone();
    hub.subscribe(
        "undo_second",
        Box::new(move |_| {
            undo_seen_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();

    hub.publish_reply(&failure_reply_topic(&txn.id, "second"), ok_reply())
        .await
        .unwrap();
    wait_until(|| undo_seen.load(std::sync::atomic::Ordering::SeqCst) == 1).await;

    hub.publish_reply(&success_reply_topic(&txn.id, "undo_second"), ok_reply())
        .await
        .unwrap();

    wait_until(|| recipe.active_transactions() == 0).await;
    assert_eq!(txn.state().await, TransactionState::Failed);
}

#[tokio::test]
async fn hot_swapped_recipe_keeps_serving_in_flight_transactions() {
    let (coordinator, hub) = coordinator().await;

    let mut stages_v1 = HashMap::new();
    stages_v1.insert("step".to_string(), Stage::terminal());
    let v1 = coordinator
        .register(Recipe::new("Hot Swap", "hotswap.trigger", "step", stages_v1))
        .await
        .unwrap();

    hub.publish_raw(&v1.triggered_by, Bytes::from_static(b"first"))
        .await
        .unwrap();
    wait_until(|| v1.active_transactions() == 1).await;
    let in_flight = in_flight_transaction(coordinator.cache()).await.unwrap();

    // Registering a second recipe under the same name drains v1: new
    // triggers route to v2, but v1's in-flight transaction must still be
    // resolvable and able to complete on v1's stage graph.
    let mut stages_v2 = HashMap::new();
    stages_v2.insert("step".to_string(), Stage::terminal());
    let v2 = coordinator
        .register(Recipe::new("Hot Swap", "hotswap.trigger", "step", stages_v2))
        .await
        .unwrap();
    assert_ne!(v1.id, v2.id);

    let ok_topic = success_reply_topic(&in_flight.id, "step");
    hub.publish_reply(&ok_topic, ok_reply()).await.unwrap();
    wait_until(|| v1.active_transactions() == 0).await;

    coordinator.clear_inactive().await.unwrap();

    hub.publish_raw(&v2.triggered_by, Bytes::from_static(b"second"))
        .await
        .unwrap();
    wait_until(|| v2.active_transactions() == 1).await;
}
