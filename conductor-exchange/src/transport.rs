//! Transport abstraction for the control-plane broker

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ExchangeError;

/// Delivery guarantee requested for a single publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl ServiceLevel {
    /// Numeric level as understood by brokers (0, 1 or 2)
    pub fn code(self) -> u8 {
        match self {
            ServiceLevel::AtMostOnce => 0,
            ServiceLevel::AtLeastOnce => 1,
            ServiceLevel::ExactlyOnce => 2,
        }
    }
}

/// Raw inbound message as handed over by a transport
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
}

/// Where a transport pushes inbound deliveries
pub type DeliverySink = mpsc::UnboundedSender<Delivery>;

/// Pub/sub transport trait
///
/// Implementations hand inbound messages to the sink passed to
/// [`Transport::connect`] and must never run caller logic on their own
/// receive path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh session; subscriptions from earlier sessions are gone
    async fn connect(&self, sink: DeliverySink) -> Result<(), ExchangeError>;

    /// Close the session
    async fn disconnect(&self) -> Result<(), ExchangeError>;

    /// Publish a payload on a topic
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        level: ServiceLevel,
    ) -> Result<(), ExchangeError>;

    /// Start receiving messages published on a topic
    async fn subscribe(&self, topic: &str, level: ServiceLevel) -> Result<(), ExchangeError>;

    /// Stop receiving messages published on a topic
    async fn unsubscribe(&self, topic: &str) -> Result<(), ExchangeError>;

    /// Check if the session is live
    fn is_connected(&self) -> bool;
}
