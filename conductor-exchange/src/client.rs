//! Exchange client: notes in, notes out
//!
//! [`ExchangeClient`] owns a transport session. Outbound notes are encoded
//! and published, reconnecting first when the session was lost. Inbound
//! deliveries are decoded on a dedicated receive task and handed to a
//! [`Collector`]; that task never runs caller logic.

use bytes::Bytes;
use conductor_protocol::{codec, Note};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::error::ExchangeError;
use crate::reconnect::ReconnectPolicy;
use crate::registry::PeerRegistry;
use crate::transport::{Delivery, DeliverySink, ServiceLevel, Transport};

/// Pub/sub client speaking in notes
pub struct ExchangeClient {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    sink: DeliverySink,
    subscriptions: Mutex<BTreeMap<String, ServiceLevel>>,
    collector: Arc<Collector>,
    registry: Arc<PeerRegistry>,
    ready: AtomicBool,
    shutdown: CancellationToken,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl ExchangeClient {
    /// Start the receive task and open a session
    pub async fn connect(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Result<Self, ExchangeError> {
        let (sink, deliveries) = mpsc::unbounded_channel();
        let collector = Arc::new(Collector::new());
        let registry = Arc::new(PeerRegistry::new());
        let shutdown = CancellationToken::new();

        let receiver = tokio::spawn(receive_loop(
            deliveries,
            collector.clone(),
            registry.clone(),
            shutdown.clone(),
        ));

        let client = Self {
            transport,
            policy,
            sink,
            subscriptions: Mutex::new(BTreeMap::new()),
            collector,
            registry,
            ready: AtomicBool::new(false),
            shutdown,
            receiver: Mutex::new(Some(receiver)),
        };

        client.policy.execute(|_| client.reconnect()).await?;
        Ok(client)
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// True once a session is open and every subscription has been replayed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.transport.is_connected()
    }

    /// Topics this client is subscribed to
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Open a new session and replay all registered subscriptions
    async fn reconnect(&self) -> Result<(), ExchangeError> {
        if self.shutdown.is_cancelled() {
            return Err(ExchangeError::Closed);
        }
        self.ready.store(false, Ordering::Release);
        self.transport.connect(self.sink.clone()).await?;

        let subscriptions: Vec<(String, ServiceLevel)> = self
            .subscriptions
            .lock()
            .iter()
            .map(|(topic, level)| (topic.clone(), *level))
            .collect();
        for (topic, level) in &subscriptions {
            self.transport.subscribe(topic, *level).await?;
        }

        self.ready.store(true, Ordering::Release);
        info!(
            "Exchange session ready with {} subscriptions",
            subscriptions.len()
        );
        Ok(())
    }

    async fn ensure_connected(&self) -> Result<(), ExchangeError> {
        if self.shutdown.is_cancelled() {
            return Err(ExchangeError::Closed);
        }
        if !self.transport.is_connected() {
            warn!("Exchange session lost, reconnecting");
            self.reconnect().await?;
        }
        Ok(())
    }

    /// Encode and publish a note
    ///
    /// Errors that outlive the reconnection policy are returned to the caller.
    pub async fn publish(
        &self,
        topic: &str,
        note: &Note,
        level: ServiceLevel,
    ) -> Result<(), ExchangeError> {
        let payload = codec::encode(note)?;
        self.publish_raw(topic, payload, level).await?;
        debug!("Published {} to {}", note, topic);
        Ok(())
    }

    async fn publish_raw(
        &self,
        topic: &str,
        payload: Bytes,
        level: ServiceLevel,
    ) -> Result<(), ExchangeError> {
        self.policy
            .execute(|_| {
                let payload = payload.clone();
                async move {
                    self.ensure_connected().await?;
                    self.transport.publish(topic, payload, level).await
                }
            })
            .await
    }

    /// Publish a sequence of notes exactly once each, letting `throttle`
    /// decide how long to pause after every note
    ///
    /// `throttle` receives the number of notes sent so far and the total.
    pub async fn publish_throttled<F>(
        &self,
        topic: &str,
        notes: &[Note],
        mut throttle: F,
    ) -> Result<(), ExchangeError>
    where
        F: FnMut(usize, usize) -> Duration,
    {
        let total = notes.len();
        for (index, note) in notes.iter().enumerate() {
            self.publish(topic, note, ServiceLevel::ExactlyOnce).await?;
            let pause = throttle(index + 1, total);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }

    /// Subscribe to a topic; the subscription survives reconnects
    pub async fn subscribe(&self, topic: &str, level: ServiceLevel) -> Result<(), ExchangeError> {
        self.subscriptions.lock().insert(topic.to_string(), level);
        self.policy
            .execute(|_| async move {
                self.ensure_connected().await?;
                self.transport.subscribe(topic, level).await
            })
            .await?;
        debug!("Subscribed to {}", topic);
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ExchangeError> {
        self.subscriptions.lock().remove(topic);
        if self.transport.is_connected() {
            self.transport.unsubscribe(topic).await?;
        }
        debug!("Unsubscribed from {}", topic);
        Ok(())
    }

    /// Close the session and stop the receive task
    pub async fn disconnect(&self) -> Result<(), ExchangeError> {
        self.shutdown.cancel();
        self.ready.store(false, Ordering::Release);
        let receiver = self.receiver.lock().take();
        if let Some(receiver) = receiver {
            let _ = receiver.await;
        }
        self.transport.disconnect().await
    }
}

impl Drop for ExchangeClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn receive_loop(
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    collector: Arc<Collector>,
    registry: Arc<PeerRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else { break };
                match codec::decode(&delivery.payload) {
                    Ok(note) => {
                        registry.observe(&note);
                        collector.push(note);
                    }
                    Err(err) => {
                        warn!("Dropping undecodable note on {}: {}", delivery.topic, err);
                    }
                }
            }
        }
    }
    debug!("Receive task stopped");
}
