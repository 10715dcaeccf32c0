//! In-process broker
//!
//! [`MemoryBroker`] routes messages between [`MemoryTransport`] sessions
//! inside one process. It backs lab runs and tests, records every publish
//! with its service level, and can sever sessions or fail publishes on demand.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::ExchangeError;
use crate::transport::{Delivery, DeliverySink, ServiceLevel, Transport};

/// A publish observed by the broker
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub topic: String,
    pub level: ServiceLevel,
    pub payload: Bytes,
}

struct Session {
    sink: DeliverySink,
    subscriptions: HashSet<String>,
}

#[derive(Default)]
struct BrokerState {
    next_session: u64,
    sessions: HashMap<u64, Session>,
    published: Vec<PublishRecord>,
    failing_publishes: usize,
}

/// In-process broker shared by any number of transports
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, not yet connected, session handle
    pub fn transport(&self) -> MemoryTransport {
        let mut state = self.state.lock();
        state.next_session += 1;
        MemoryTransport {
            broker: self.clone(),
            session: state.next_session,
        }
    }

    /// Every publish seen so far
    pub fn published(&self) -> Vec<PublishRecord> {
        self.state.lock().published.clone()
    }

    /// Publishes seen on one topic
    pub fn published_to(&self, topic: &str) -> Vec<PublishRecord> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of live sessions subscribed to a topic filter
    pub fn subscriber_count(&self, filter: &str) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|session| session.subscriptions.contains(filter))
            .count()
    }

    /// Drop every live session, as a broker restart would
    pub fn sever_all(&self) {
        let mut state = self.state.lock();
        debug!("Severing {} broker sessions", state.sessions.len());
        state.sessions.clear();
    }

    /// Make the next `count` publishes fail with a connection error
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().failing_publishes = count;
    }
}

/// Whether a subscription filter matches a topic
///
/// Filters match exactly, or by prefix when they end in `/#`; a bare `#`
/// matches everything.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter == "#" || filter == topic {
        return true;
    }
    match filter.strip_suffix("/#") {
        Some(prefix) => topic
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        None => false,
    }
}

/// One session on a [`MemoryBroker`]
pub struct MemoryTransport {
    broker: MemoryBroker,
    session: u64,
}

impl MemoryTransport {
    pub fn session_id(&self) -> u64 {
        self.session
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, sink: DeliverySink) -> Result<(), ExchangeError> {
        let mut state = self.broker.state.lock();
        state.sessions.insert(
            self.session,
            Session {
                sink,
                subscriptions: HashSet::new(),
            },
        );
        debug!("Session {} connected", self.session);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExchangeError> {
        self.broker.state.lock().sessions.remove(&self.session);
        debug!("Session {} disconnected", self.session);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        level: ServiceLevel,
    ) -> Result<(), ExchangeError> {
        let mut state = self.broker.state.lock();
        if !state.sessions.contains_key(&self.session) {
            return Err(ExchangeError::NotConnected);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ExchangeError::Connection(format!(
                "publish to {} rejected by broker",
                topic
            )));
        }

        state.published.push(PublishRecord {
            topic: topic.to_string(),
            level,
            payload: payload.clone(),
        });

        for (id, session) in state.sessions.iter() {
            if session
                .subscriptions
                .iter()
                .any(|filter| topic_matches(filter, topic))
            {
                trace!("Routing {} to session {}", topic, id);
                // A closed sink means the receiver went away; the session is
                // cleaned up on its next disconnect.
                let _ = session.sink.send(Delivery {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, _level: ServiceLevel) -> Result<(), ExchangeError> {
        let mut state = self.broker.state.lock();
        let session = state
            .sessions
            .get_mut(&self.session)
            .ok_or(ExchangeError::NotConnected)?;
        session.subscriptions.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ExchangeError> {
        let mut state = self.broker.state.lock();
        let session = state
            .sessions
            .get_mut(&self.session)
            .ok_or(ExchangeError::NotConnected)?;
        session.subscriptions.remove(topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.broker
            .state
            .lock()
            .sessions
            .contains_key(&self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/bc"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(!topic_matches("a/#", "ab/c"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[tokio::test]
    async fn test_routes_only_to_subscribers() {
        let broker = MemoryBroker::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = broker.transport();
        let b = broker.transport();
        a.connect(tx_a).await.unwrap();
        b.connect(tx_b).await.unwrap();
        a.subscribe("t/one", ServiceLevel::AtLeastOnce).await.unwrap();

        b.publish("t/one", Bytes::from_static(b"hi"), ServiceLevel::AtMostOnce)
            .await
            .unwrap();

        let delivery = rx_a.try_recv().unwrap();
        assert_eq!(delivery.topic, "t/one");
        assert_eq!(&delivery.payload[..], b"hi");
        assert!(rx_b.try_recv().is_err());

        let records = broker.published_to("t/one");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, ServiceLevel::AtMostOnce);
    }

    #[tokio::test]
    async fn test_sever_drops_sessions_and_subscriptions() {
        let broker = MemoryBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = broker.transport();
        transport.connect(tx.clone()).await.unwrap();
        transport
            .subscribe("t", ServiceLevel::AtLeastOnce)
            .await
            .unwrap();
        assert_eq!(broker.subscriber_count("t"), 1);

        broker.sever_all();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport
                .publish("t", Bytes::new(), ServiceLevel::AtMostOnce)
                .await,
            Err(ExchangeError::NotConnected)
        ));

        transport.connect(tx).await.unwrap();
        assert_eq!(broker.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_injected_publish_failures() {
        let broker = MemoryBroker::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = broker.transport();
        transport.connect(tx).await.unwrap();

        broker.fail_next_publishes(1);
        assert!(transport
            .publish("t", Bytes::new(), ServiceLevel::AtMostOnce)
            .await
            .is_err());
        assert!(transport
            .publish("t", Bytes::new(), ServiceLevel::AtMostOnce)
            .await
            .is_ok());
        assert_eq!(broker.published().len(), 1);
    }
}
