//! `Hub` is the pub/sub bus transactions and recipe triggers flow over
//! (spec §4.7), plus the transient "reply group" mechanism stage dispatch
//! uses to guarantee a stage's success/failure handlers fire at most once
//! (spec §4.3, §9).
//!
//! Grounded on `examples/original_source/pkg/service/hub.go`
//! (`HubConnector`, `TestHub`'s group-keyed subscriber map) for the
//! group/cancel shape, and on `angzarr`'s
//! `bus::channel::ChannelEventBus` for the actual `tokio::sync::broadcast`
//! plumbing underneath a raw `subscribe`.

pub mod in_memory;
#[cfg(feature = "streaming-hub")]
pub mod streaming;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::HubError;
use crate::proto::{Reply, Request};

pub use in_memory::InMemoryHub;
#[cfg(feature = "streaming-hub")]
pub use streaming::StreamingHub;

/// Handler for a raw trigger subscription (spec §4.2: recipe registration
/// subscribes to `triggered_by` with the recipe's own payload bytes, not a
/// `Request`/`Reply`).
pub type RawHandler = Box<dyn Fn(Bytes) + Send + Sync>;

/// Handler for a stage reply (spec §4.3).
pub type ReplyHandler = Box<dyn Fn(Reply) + Send + Sync>;

/// Opaque key scoping a set of reply subscriptions so they can be
/// cancelled together once a transaction steps past the stage that
/// created them. One key per in-flight transaction (spec §4.3: "keyed by
/// transaction id").
pub type GroupKey = String;

#[async_trait]
pub trait Hub: Send + Sync {
    /// Subscribe to a topic outside any group. Lives for the lifetime of
    /// the `Hub`; there is no way to cancel it individually, so only use
    /// this for subscriptions meant to live as long as the `Hub` does.
    async fn subscribe(&self, topic: &str, handler: RawHandler) -> Result<(), HubError>;

    /// Subscribe to a topic under `group`, so a later `cancel_group`
    /// detaches it (spec §4.2 step 4's recipe trigger subscription, keyed
    /// by `recipe.id` so draining/hot-swapping a recipe can cancel exactly
    /// its own trigger subscription and no other).
    async fn sub_group(&self, group: &GroupKey, topic: &str, handler: RawHandler) -> Result<(), HubError>;

    /// Subscribe to a reply topic under `group`, so a later `cancel_group`
    /// detaches it (spec §4.3).
    async fn subscribe_reply(
        &self,
        group: &GroupKey,
        topic: &str,
        handler: ReplyHandler,
    ) -> Result<(), HubError>;

    /// Detach every subscription — raw (`sub_group`) or reply
    /// (`subscribe_reply`) — registered under `group`. Idempotent:
    /// cancelling an unknown or already-cancelled group is not an error
    /// (spec §9: a duplicate reply racing the cancel must not double-fire,
    /// not that the cancel itself must be checked for prior existence).
    async fn cancel_group(&self, group: &GroupKey) -> Result<(), HubError>;

    /// Dispatch a stage `Request` to `topic`.
    async fn publish_request(&self, topic: &str, request: Request) -> Result<(), HubError>;

    /// Publish raw bytes to a topic, for recipe trigger producers outside
    /// this crate (and for driving `subscribe`d topics directly in tests).
    async fn publish_raw(&self, topic: &str, data: Bytes) -> Result<(), HubError>;

    /// Deliver a `Reply` to every subscriber (raw and grouped) of `topic`.
    /// Exposed so backends can be driven directly in tests without a real
    /// downstream component publishing replies.
    async fn publish_reply(&self, topic: &str, reply: Reply) -> Result<(), HubError>;
}

/// Success reply topic for a stage dispatch (spec §6 wire format).
pub fn success_reply_topic(transaction_id: &str, stage_topic: &str) -> String {
    format!("sake.reply.ok.{transaction_id}@{stage_topic}")
}

/// Failure reply topic for a stage dispatch (spec §6 wire format).
pub fn failure_reply_topic(transaction_id: &str, stage_topic: &str) -> String {
    format!("sake.reply.fail.{transaction_id}@{stage_topic}")
}
