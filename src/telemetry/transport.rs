use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

use crate::limits::{BROKER_CHANNEL_CAPACITY, MAX_TELEMETRY_PAYLOAD_BYTES};

const MAX_TOPIC_LEN: usize = 256;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid topic: {0:?}")]
    InvalidTopic(String),
    #[error("payload of {0} bytes exceeds the limit")]
    PayloadTooLarge(usize),
    #[error("transport closed")]
    Closed,
}

fn check_topic(topic: &str) -> Result<(), TransportError> {
    let ok = !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && !topic.contains(['#', '+', '\0']);
    if ok {
        Ok(())
    } else {
        Err(TransportError::InvalidTopic(topic.to_string()))
    }
}

/// Messages arriving on one topic.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Bytes>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload, or `None` once the transport has gone away. A slow
    /// reader that falls behind skips what it missed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("subscription to {} lagged, skipped {n} messages", self.topic);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Topic-based publish/subscribe, as offered by an MQTT broker.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    /// Fire-and-forget; no delivery acknowledgement.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;
}

/// In-process broker: one broadcast channel per topic.
#[derive(Default)]
pub struct LocalBroker {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(BROKER_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl PubSub for LocalBroker {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        check_topic(topic)?;
        Ok(Subscription {
            topic: topic.to_string(),
            rx: self.sender(topic).subscribe(),
        })
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        check_topic(topic)?;
        if payload.len() > MAX_TELEMETRY_PAYLOAD_BYTES {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }
        if let Some(sender) = self.topics.get(topic) {
            // No subscribers is not an error.
            let _ = sender.send(payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let broker = LocalBroker::new();
        let mut sub = broker.subscribe("locationUpdate").await.unwrap();
        broker
            .publish("locationUpdate", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"{}"));
        assert_eq!(sub.topic(), "locationUpdate");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = LocalBroker::new();
        let mut ring = broker.subscribe("Ring_1").await.unwrap();
        broker.publish("Ring_2", Bytes::from_static(b"x")).await.unwrap();
        broker.publish("Ring_1", Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(ring.recv().await.unwrap(), Bytes::from_static(b"y"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let broker = LocalBroker::new();
        broker.publish("nobody", Bytes::from_static(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_bad_topics_and_oversized_payloads() {
        let broker = LocalBroker::new();
        assert!(matches!(broker.subscribe("").await, Err(TransportError::InvalidTopic(_))));
        assert!(matches!(broker.subscribe("a/#").await, Err(TransportError::InvalidTopic(_))));
        let big = Bytes::from(vec![b'x'; MAX_TELEMETRY_PAYLOAD_BYTES + 1]);
        assert!(matches!(
            broker.publish("t", big).await,
            Err(TransportError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let broker = LocalBroker::new();
        let mut sub = broker.subscribe("t").await.unwrap();
        for i in 0..(BROKER_CHANNEL_CAPACITY + 10) {
            broker.publish("t", Bytes::from(i.to_string())).await.unwrap();
        }
        let first = sub.recv().await.unwrap();
        assert_ne!(first, Bytes::from("0"));
    }
}
