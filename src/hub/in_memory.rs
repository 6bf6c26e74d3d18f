//! In-process `Hub`: raw topics are `tokio::sync::broadcast` channels fed
//! by a spawned consumer task per subscription (the pattern `angzarr`'s
//! `ChannelEventBus::start_consuming` uses), while reply groups are a
//! direct-dispatch map mirroring
//! `examples/original_source/pkg/service/hub.go`'s `TestHub` — publish
//! walks every group's subscriber list for the topic rather than fanning
//! out over a channel, since a reply group is consumed exactly once and
//! then discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use super::{GroupKey, Hub, RawHandler, ReplyHandler};
use crate::error::HubError;
use crate::proto::{Reply, Request};

const CHANNEL_CAPACITY: usize = 1024;

struct GroupState {
    /// Guards against a reply being handled twice, e.g. a duplicate
    /// delivery racing `cancel_group` (spec §9).
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

#[derive(Default)]
struct Topics {
    senders: HashMap<String, broadcast::Sender<Bytes>>,
}

impl Topics {
    fn sender_for(&mut self, topic: &str) -> broadcast::Sender<Bytes> {
        self.senders
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

pub struct InMemoryHub {
    topics: RwLock<Topics>,
    groups: RwLock<HashMap<GroupKey, GroupState>>,
    /// Consumer tasks spawned by `sub_group`, keyed the same way so
    /// `cancel_group` can abort exactly the ones belonging to that group.
    raw_groups: RwLock<HashMap<GroupKey, Vec<JoinHandle<()>>>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        tracing::info!("in-memory hub ready");
        Self {
            topics: RwLock::new(Topics::default()),
            groups: RwLock::new(HashMap::new()),
            raw_groups: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hub for InMemoryHub {
    async fn subscribe(&self, topic: &str, handler: RawHandler) -> Result<(), HubError> {
        let mut receiver = self.topics.write().await.sender_for(topic).subscribe();
        let topic_name = topic.to_string();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => handler(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %topic_name, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    async fn sub_group(&self, group: &GroupKey, topic: &str, handler: RawHandler) -> Result<(), HubError> {
        let mut receiver = self.topics.write().await.sender_for(topic).subscribe();
        let topic_name = topic.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => handler(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %topic_name, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
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
        let mut groups = self.groups.write().await;
        let state = groups.entry(group.clone()).or_insert_with(GroupState::new);
        state
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .push(handler);
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
        let payload = Bytes::from(request.encode_to_vec());
        let sender = self.topics.write().await.sender_for(topic);
        // No subscribers is a valid outcome for a fire-and-forget publish;
        // only a send on a channel nobody will ever read is an error, and
        // broadcast's SendError only reports "no receivers", which is not
        // fatal here.
        let _ = sender.send(payload);
        Ok(())
    }

    async fn publish_raw(&self, topic: &str, data: Bytes) -> Result<(), HubError> {
        let sender = self.topics.write().await.sender_for(topic);
        let _ = sender.send(data);
        Ok(())
    }

    async fn publish_reply(&self, topic: &str, reply: Reply) -> Result<(), HubError> {
        let mut groups = self.groups.write().await;
        let mut consumed_groups = Vec::new();

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
                consumed_groups.push(key.clone());
            }
        }

        for key in consumed_groups {
            groups.remove(&key);
        }

        Ok(())
    }
}
