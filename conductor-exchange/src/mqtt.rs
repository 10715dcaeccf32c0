//! MQTT transport
//!
//! [`MqttTransport`] speaks to a networked broker through `rumqttc`. Every
//! [`Transport::connect`] opens a clean session, so subscriptions do not
//! survive a reconnect; the exchange client replays them. A poller task owns
//! the event loop and forwards inbound publishes to the delivery sink.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::ExchangeError;
use crate::transport::{Delivery, DeliverySink, ServiceLevel, Transport};

pub const DEFAULT_MQTT_PORT: u16 = 1883;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 64;

// Log chunks can be up to 10 MB of data plus the note envelope
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Where the control-plane broker lives, as given by the exchange URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAddress {
    /// `memory://`: the in-process broker of lab runs
    Memory,
    /// `mqtt://host[:port]` or `tcp://host[:port]`
    Mqtt { host: String, port: u16 },
}

impl BrokerAddress {
    pub fn parse(url: &str) -> Result<Self, ExchangeError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ExchangeError::Connection(format!("broker URL '{}' has no scheme", url)))?;

        match scheme.to_ascii_lowercase().as_str() {
            "memory" => Ok(BrokerAddress::Memory),
            "mqtt" | "tcp" => {
                let authority = rest.split('/').next().unwrap_or_default();
                let (host, port) = match authority.rsplit_once(':') {
                    Some((host, port)) => {
                        let port = port.parse::<u16>().map_err(|e| {
                            ExchangeError::Connection(format!("invalid port in '{}': {}", url, e))
                        })?;
                        (host, port)
                    }
                    None => (authority, DEFAULT_MQTT_PORT),
                };
                if host.is_empty() {
                    return Err(ExchangeError::Connection(format!(
                        "broker URL '{}' has no host",
                        url
                    )));
                }
                Ok(BrokerAddress::Mqtt {
                    host: host.to_string(),
                    port,
                })
            }
            other => Err(ExchangeError::Connection(format!(
                "unsupported broker scheme '{}'",
                other
            ))),
        }
    }
}

fn qos(level: ServiceLevel) -> QoS {
    match level {
        ServiceLevel::AtMostOnce => QoS::AtMostOnce,
        ServiceLevel::AtLeastOnce => QoS::AtLeastOnce,
        ServiceLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

struct Session {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

/// Session on a networked MQTT broker
pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    connect_timeout: Duration,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Transport for `host:port`; the client id gets a random suffix so
    /// several processes can share a name
    pub fn new(host: impl Into<String>, port: u16, client_name: &str) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: format!("conductor-{}-{:08x}", client_name, rand::random::<u32>()),
            connect_timeout: CONNECT_TIMEOUT,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = limit;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.as_str(), self.host.as_str(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options
    }

    fn client(&self) -> Result<AsyncClient, ExchangeError> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(ExchangeError::NotConnected)
    }

    fn drop_session(&self) -> Option<AsyncClient> {
        self.connected.store(false, Ordering::Release);
        self.session.lock().take().map(|session| {
            session.poller.abort();
            session.client
        })
    }
}

/// Drive the event loop until the connection is acknowledged
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ExchangeError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ExchangeError::Connection(format!(
                        "broker refused the connection: {:?}",
                        code
                    ))),
                };
            }
            Ok(event) => trace!("MQTT event before ConnAck: {:?}", event),
            Err(err) => return Err(ExchangeError::Connection(err.to_string())),
        }
    }
}

/// Forward inbound publishes until the connection drops or the sink closes
async fn poll(mut eventloop: EventLoop, sink: DeliverySink, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!("MQTT message on {}", publish.topic);
                let delivery = Delivery {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if sink.send(delivery).is_err() {
                    debug!("Delivery sink closed, stopping the MQTT poller");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the MQTT session");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("MQTT connection lost: {}", err);
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, sink: DeliverySink) -> Result<(), ExchangeError> {
        if let Some(stale) = self.drop_session() {
            // The old session is gone either way
            let _ = stale.disconnect().await;
        }

        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        timeout(self.connect_timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| {
                ExchangeError::Connection(format!(
                    "no answer from {}:{} within {:?}",
                    self.host, self.port, self.connect_timeout
                ))
            })??;

        self.connected.store(true, Ordering::Release);
        let poller = tokio::spawn(poll(eventloop, sink, self.connected.clone()));
        *self.session.lock() = Some(Session { client, poller });

        info!(
            "Connected to MQTT broker {}:{} as {}",
            self.host, self.port, self.client_id
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExchangeError> {
        if let Some(client) = self.drop_session() {
            client
                .disconnect()
                .await
                .map_err(|e| ExchangeError::Connection(e.to_string()))?;
            debug!("Disconnected {} from the MQTT broker", self.client_id);
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        level: ServiceLevel,
    ) -> Result<(), ExchangeError> {
        if !self.is_connected() {
            return Err(ExchangeError::NotConnected);
        }
        self.client()?
            .publish_bytes(topic, qos(level), false, payload)
            .await
            .map_err(|e| ExchangeError::Connection(format!("publish to {} failed: {}", topic, e)))
    }

    async fn subscribe(&self, topic: &str, level: ServiceLevel) -> Result<(), ExchangeError> {
        self.client()?
            .subscribe(topic, qos(level))
            .await
            .map_err(|e| ExchangeError::Connection(format!("subscribe to {} failed: {}", topic, e)))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ExchangeError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| {
                ExchangeError::Connection(format!("unsubscribe from {} failed: {}", topic, e))
            })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.poller.abort();
        }
    }
}
