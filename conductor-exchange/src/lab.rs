//! In-process peer fleet for lab runs

use conductor_config::LabConfig;
use conductor_protocol::{PeerInfo, Role, Topics};
use std::sync::Arc;
use tracing::info;

use crate::error::ExchangeError;
use crate::memory::MemoryBroker;
use crate::node::{PeerNode, SimulatedWorker, Worker};
use crate::reconnect::ReconnectPolicy;

const LAB_HOST: &str = "lab";

/// A set of simulated peers sharing one [`MemoryBroker`]
pub struct Lab {
    peers: Vec<PeerNode>,
}

impl Lab {
    /// Start the fleet described by `config`
    ///
    /// Worker peers are named `receiver-N` and `sender-N` alternately. They
    /// join without a role and wait to be assigned one, unless `preassigned`
    /// is set, in which case they declare the role their name implies.
    pub async fn start(
        broker: &MemoryBroker,
        topics: &Topics,
        config: &LabConfig,
        preassigned: bool,
    ) -> Result<Self, ExchangeError> {
        let worker: Arc<dyn Worker> = Arc::new(SimulatedWorker::from_config(config));
        let mut peers = Vec::with_capacity(config.workers + config.inspectors);

        for index in 0..config.workers {
            let kind = if index % 2 == 0 { "receiver" } else { "sender" };
            let name = format!("{}-{}", kind, index / 2 + 1);
            let role = if preassigned {
                Role::from_peer_name(&name)
            } else {
                Role::Other
            };
            peers.push(
                Self::spawn(broker, topics, PeerInfo::new(name, LAB_HOST, role), worker.clone())
                    .await?,
            );
        }

        for index in 0..config.inspectors {
            let name = format!("inspector-{}", index + 1);
            peers.push(
                Self::spawn(
                    broker,
                    topics,
                    PeerInfo::new(name, LAB_HOST, Role::Inspector),
                    worker.clone(),
                )
                .await?,
            );
        }

        info!("Lab started with {} peers", peers.len());
        Ok(Self { peers })
    }

    async fn spawn(
        broker: &MemoryBroker,
        topics: &Topics,
        info: PeerInfo,
        worker: Arc<dyn Worker>,
    ) -> Result<PeerNode, ExchangeError> {
        PeerNode::start(
            Arc::new(broker.transport()),
            ReconnectPolicy::default(),
            topics.clone(),
            info,
            worker,
        )
        .await
    }

    pub fn peers(&self) -> &[PeerNode] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Stop every peer
    pub async fn shutdown(self) {
        for peer in self.peers {
            peer.shutdown().await;
        }
    }
}
