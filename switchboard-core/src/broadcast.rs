//! Live fan-out of processed messages to connected subscribers.
//!
//! Each subscriber owns a bounded channel, so a slow reader only loses its own
//! messages. Serialization happens once per message.
use crate::pipeline::MessageHandler;
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use switchboard_common::Message;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct BroadcastHub {
    subscribers: Arc<DashMap<Uuid, mpsc::Sender<Arc<str>>>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber; JSON frames arrive on the returned receiver.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<Arc<str>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.insert(id, tx);
        tracing::debug!(subscriber = %id, "subscriber added");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            tracing::debug!(subscriber = %id, "subscriber removed");
        }
        removed
    }

    /// Drop every subscriber; their receivers observe a closed channel.
    pub fn clear(&self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Send `frame` to every subscriber that can take it right now.
    ///
    /// Full channels are skipped; closed ones are removed. Returns how many
    /// subscribers accepted the frame.
    pub fn broadcast(&self, frame: Arc<str>) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(subscriber = %entry.key(), "subscriber lagging; frame skipped");
                }
                Err(TrySendError::Closed(_)) => dead.push(*entry.key()),
            }
        }
        // removal after iteration; DashMap shards are still read-locked inside the loop
        for id in dead {
            self.unsubscribe(&id);
        }
        delivered
    }
}

#[async_trait::async_trait]
impl MessageHandler for BroadcastHub {
    async fn handle(&self, msg: &Message) -> Result<()> {
        if self.subscribers.is_empty() {
            return Ok(());
        }
        match serde_json::to_string(msg) {
            Ok(json) => {
                self.broadcast(Arc::from(json));
            }
            Err(err) => {
                tracing::warn!(
                    key = %msg.dedup_key(),
                    error = %err,
                    "message not serializable; broadcast skipped"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::msg;

    #[tokio::test]
    async fn every_subscriber_gets_the_json_frame() {
        let hub = BroadcastHub::default();
        let (_a, mut rx_a) = hub.subscribe();
        let (_b, mut rx_b) = hub.subscribe();

        hub.handle(&msg("telegram", "t1", "5")).await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.unwrap();
            let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(v["id"], "5");
            assert_eq!(v["source_id"], "t1");
        }
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let hub = BroadcastHub::default();
        let (_keep, _rx_keep) = hub.subscribe();
        let (_gone, rx_gone) = hub.subscribe();
        drop(rx_gone);

        assert_eq!(hub.broadcast(Arc::from("{}")), 1);
        assert_eq!(hub.len(), 1);
    }

    #[tokio::test]
    async fn full_subscriber_is_skipped_not_removed() {
        let hub = BroadcastHub::new(1);
        let (_id, mut rx) = hub.subscribe();

        assert_eq!(hub.broadcast(Arc::from("first")), 1);
        assert_eq!(hub.broadcast(Arc::from("second")), 0);
        assert_eq!(hub.len(), 1);
        assert_eq!(&*rx.recv().await.unwrap(), "first");
    }

    #[test]
    fn unsubscribe_and_clear() {
        let hub = BroadcastHub::default();
        let (id, _rx) = hub.subscribe();
        let (_other, _rx2) = hub.subscribe();

        assert!(hub.unsubscribe(&id));
        assert!(!hub.unsubscribe(&id));
        hub.clear();
        assert!(hub.is_empty());
    }
}
