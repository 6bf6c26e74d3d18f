//! Durable `Hub` over NATS JetStream, grounded on `angzarr`'s
//! `bus::nats::NatsEventBus` for the connection/stream/consumer shape:
//! a durable pull consumer per subscription with `AckPolicy::Explicit`,
//! `max_ack_pending(1)` so replies are handled one at a time per stage
//! (spec §4.7: "at-least-once delivery with a durable consumer"), and
//! subject-per-topic streams the way the original uses subject-per-domain
//! streams.
//!
//! Reply-group bookkeeping (the once-guard, the subscriber map) is the
//! same in-process logic as `InMemoryHub`'s — only the underlying
//! transport of raw topics is swapped for a JetStream subject, and replies
//! arrive over their own durable consumer instead of a direct call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::jetstream::{
    self,
    consumer::pull::Config as PullConsumerConfig,
    consumer::{AckPolicy, DeliverPolicy},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    Context,
};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use prost::Message;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::{GroupKey, Hub, RawHandler, ReplyHandler};
use crate::config::StreamingHubConfig;
use crate::error::HubError;
use crate::proto::{Reply, Request};

/// Backoff schedule for the initial broker connection, mirroring
/// `angzarr`'s `connection_backoff()` used around its own gRPC/NATS
/// dial loops.
fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_jitter()
        .with_max_times(5)
}

struct GroupState {
    fired: AtomicBool,
    subscriptions: HashMap<String, Vec<ReplyHandler>>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            subscriptions: HashMap::new(),
        }
    }
}

type Groups = Arc<RwLock<HashMap<GroupKey, GroupState>>>;

/// Walk every group subscribed to `topic`, deliver `reply` to the first
/// one to win the once-guard, then drop it. Shared between `publish_reply`
/// (called directly in tests/local drivers) and the spawned reply
/// consumer task (called on real JetStream delivery).
async fn dispatch_reply(groups: &Groups, topic: &str, reply: Reply) {
    let mut groups = groups.write().await;
    let mut consumed = Vec::new();
    for (key, state) in groups.iter() {
        if !state.subscriptions.contains_key(topic) {
            continue;
        }
        if state
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(handlers) = state.subscriptions.get(topic) {
                for handler in handlers {
                    handler(reply.clone());
                }
            }
            consumed.push(key.clone());
        }
    }
    for key in consumed {
        groups.remove(&key);
    }
}

pub struct StreamingHub {
    jetstream: Context,
    stream_prefix: String,
    durable_name: String,
    groups: Groups,
    /// Consumer tasks spawned by `sub_group`, keyed the same way so
    /// `cancel_group` can abort exactly the ones belonging to that group.
    raw_groups: Arc<RwLock<HashMap<GroupKey, Vec<JoinHandle<()>>>>>,
}

impl StreamingHub {
    pub async fn connect(config: &StreamingHubConfig) -> Result<Self, HubError> {
        let server_url = config.server_url.clone();
        let client = (|| {
            let server_url = server_url.clone();
            async move { async_nats::connect(&server_url).await }
        })
        .retry(connection_backoff())
        .notify(|err: &async_nats::ConnectError, dur: std::time::Duration| {
            tracing::warn!(server = %server_url, error = %err, delay = ?dur, "streaming hub connection failed, retrying");
        })
        .await
        .map_err(|e| HubError::Backend(format!("failed to connect to {}: {e}", config.server_url)))?;
        let jetstream = jetstream::new(client);

        tracing::info!(server = %config.server_url, cluster = %config.cluster_id, "streaming hub connected");

        Ok(Self {
            jetstream,
            stream_prefix: config.cluster_id.clone(),
            durable_name: config.durable_name.clone(),
            groups: Arc::new(RwLock::new(HashMap::new())),
            raw_groups: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn stream_name(&self, topic: &str) -> String {
        format!("{}_{}", self.stream_prefix.to_uppercase(), sanitize(topic))
    }

    fn subject(&self, topic: &str) -> String {
        format!("{}.{}", self.stream_prefix, topic)
    }

    async fn ensure_stream(&self, topic: &str) -> Result<(), HubError> {
        let name = self.stream_name(topic);
        let subject = self.subject(topic);
        if self.jetstream.get_stream(&name).await.is_ok() {
            return Ok(());
        }

        self.jetstream
            .create_stream(StreamConfig {
                name,
                subjects: vec![subject],
                retention: RetentionPolicy::Limits,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| HubError::Backend(format!("failed to create stream for {topic}: {e}")))?;
        Ok(())
    }

    async fn durable_consumer(
        &self,
        topic: &str,
    ) -> Result<async_nats::jetstream::consumer::Consumer<PullConsumerConfig>, HubError> {
        self.ensure_stream(topic).await?;
        let stream = self
            .jetstream
            .get_stream(self.stream_name(topic))
            .await
            .map_err(|e| HubError::Subscribe { topic: topic.to_string(), message: e.to_string() })?;

        let consumer_name = format!("{}-{}", self.durable_name, sanitize(topic));
        let subject = self.subject(topic);
        stream
            .get_or_create_consumer(
                &consumer_name,
                PullConsumerConfig {
                    name: Some(consumer_name.clone()),
                    durable_name: Some(consumer_name.clone()),
                    filter_subject: subject,
                    deliver_policy: DeliverPolicy::All,
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| HubError::Subscribe { topic: topic.to_string(), message: e.to_string() })
    }
}

#[async_trait]
impl Hub for StreamingHub {
    async fn subscribe(&self, topic: &str, handler: RawHandler) -> Result<(), HubError> {
        let consumer = self.durable_consumer(topic).await?;
        let topic_name = topic.to_string();
        tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(topic = %topic_name, error = %e, "failed to open consumer message stream");
                    return;
                }
            };

            while let Some(msg_result) = messages.next().await {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::error!(topic = %topic_name, error = %e, "failed to receive message");
                        continue;
                    }
                };
                handler(msg.payload.clone());
                if let Err(e) = msg.ack().await {
                    tracing::error!(topic = %topic_name, error = %e, "failed to ack message");
                }
            }
        });
        Ok(())
    }

    async fn sub_group(&self, group: &GroupKey, topic: &str, handler: RawHandler) -> Result<(), HubError> {
        let consumer = self.durable_consumer(topic).await?;
        let topic_name = topic.to_string();
        let handle = tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(topic = %topic_name, error = %e, "failed to open consumer message stream");
                    return;
                }
            };

            while let Some(msg_result) = messages.next().await {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::error!(topic = %topic_name, error = %e, "failed to receive message");
                        continue;
                    }
                };
                handler(msg.payload.clone());
                if let Err(e) = msg.ack().await {
                    tracing::error!(topic = %topic_name, error = %e, "failed to ack message");
                }
            }
        });
        self.raw_groups.write().await.entry(group.clone()).or_default().push(handle);
        Ok(())
    }

    async fn subscribe_reply(
        &self,
        group: &GroupKey,
        topic: &str,
        handler: ReplyHandler,
    ) -> Result<(), HubError> {
        {
            let mut groups = self.groups.write().await;
            let state = groups.entry(group.clone()).or_insert_with(GroupState::new);
            state.subscriptions.entry(topic.to_string()).or_default().push(handler);
        }

        let consumer = self.durable_consumer(topic).await?;
        let groups = self.groups.clone();
        let topic_name = topic.to_string();
        tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(topic = %topic_name, error = %e, "failed to open reply consumer stream");
                    return;
                }
            };

            while let Some(msg_result) = messages.next().await {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::error!(topic = %topic_name, error = %e, "failed to receive reply");
                        continue;
                    }
                };
                match Reply::decode(msg.payload.as_ref()) {
                    Ok(reply) => dispatch_reply(&groups, &topic_name, reply).await,
                    Err(e) => tracing::error!(topic = %topic_name, error = %e, "failed to decode reply"),
                }
                if let Err(e) = msg.ack().await {
                    tracing::error!(topic = %topic_name, error = %e, "failed to ack reply");
                }
            }
        });

        Ok(())
    }

    async fn cancel_group(&self, group: &GroupKey) -> Result<(), HubError> {
        self.groups.write().await.remove(group);
        if let Some(handles) = self.raw_groups.write().await.remove(group) {
            for handle in handles {
                handle.abort();
            }
        }
        Ok(())
    }

    async fn publish_request(&self, topic: &str, request: Request) -> Result<(), HubError> {
        self.ensure_stream(topic).await?;
        let subject = self.subject(topic);
        let payload = request.encode_to_vec();
        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| HubError::Publish { topic: topic.to_string(), message: e.to_string() })?;
        ack.await
            .map_err(|e| HubError::Publish { topic: topic.to_string(), message: e.to_string() })?;
        Ok(())
    }

    async fn publish_raw(&self, topic: &str, data: bytes::Bytes) -> Result<(), HubError> {
        self.ensure_stream(topic).await?;
        let subject = self.subject(topic);
        let ack = self
            .jetstream
            .publish(subject.clone(), data)
            .await
            .map_err(|e| HubError::Publish { topic: topic.to_string(), message: e.to_string() })?;
        ack.await
            .map_err(|e| HubError::Publish { topic: topic.to_string(), message: e.to_string() })?;
        Ok(())
    }

    async fn publish_reply(&self, topic: &str, reply: Reply) -> Result<(), HubError> {
        self.ensure_stream(topic).await?;
        let subject = self.subject(topic);
        let payload = reply.encode_to_vec();
        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| HubError::Publish { topic: topic.to_string(), message: e.to_string() })?;
        ack.await
            .map_err(|e| HubError::Publish { topic: topic.to_string(), message: e.to_string() })?;
        Ok(())
    }
}

fn sanitize(topic: &str) -> String {
    topic.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}
