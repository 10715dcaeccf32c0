//! Control-plane exchange for Conductor
//!
//! This crate moves notes between the controller and its peers over a
//! pub/sub [`Transport`]. It provides:
//! - the exchange client with reconnect and subscription replay
//! - the [`Collector`] that buffers inbound notes and waits for quorums
//! - the [`Controller`] facade the execution engine drives
//! - peer membership snapshots ([`PeerSet`])
//! - an MQTT transport for networked brokers
//! - an in-process broker and simulated peers for lab runs and tests

pub mod client;
pub mod collector;
pub mod controller;
pub mod error;
pub mod lab;
pub mod memory;
pub mod mqtt;
pub mod node;
pub mod reconnect;
pub mod registry;
pub mod transport;

// Re-export commonly used types
pub use client::ExchangeClient;
pub use collector::Collector;
pub use controller::{Controller, DataServer, ReplyTimings};
pub use error::{ExchangeError, NotEnoughReplies};
pub use lab::Lab;
pub use memory::{MemoryBroker, MemoryTransport, PublishRecord};
pub use mqtt::{BrokerAddress, MqttTransport};
pub use node::{PeerNode, SimulatedWorker, Worker, WorkerSettings};
pub use reconnect::ReconnectPolicy;
pub use registry::{PeerRegistry, PeerSet};
pub use transport::{Delivery, DeliverySink, ServiceLevel, Transport};
