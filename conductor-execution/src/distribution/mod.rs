//! Peer role distribution
//!
//! A [`DistributionStrategy`] decides which connected peer plays which role
//! and yields the [`PeerEndpoint`]s the executor addresses. All strategies
//! share the same life cycle, implemented once by [`Strategy`]; what differs
//! is the per-peer [`AssignmentPolicy`].

mod balanced;
mod legacy;
mod non_assigning;

pub use balanced::{Balanced, ExclusiveBalanced};
pub use legacy::Legacy;
pub use non_assigning::NonAssigning;

use async_trait::async_trait;
use conductor_config::DistributionKind;
use conductor_exchange::{Controller, PeerSet};
use conductor_protocol::{PeerId, PeerInfo, Role};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::DistributionError;

/// Address of every peer currently holding `role`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub role: Role,
    pub topic: String,
}

impl PeerEndpoint {
    pub fn new(role: Role, topic: impl Into<String>) -> Self {
        Self {
            role,
            topic: topic.into(),
        }
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.role, self.topic)
    }
}

/// Role distribution over the live peer set
#[async_trait]
pub trait DistributionStrategy: Send + Sync {
    /// Assign roles on the first call, then refresh the peer set
    ///
    /// Fails when `peers` is empty, or when the refreshed set has no worker.
    async fn distribute(&mut self, peers: PeerSet) -> Result<PeerSet, DistributionError>;

    /// Take back every assigned worker role and forget the assignment
    ///
    /// Calling it with nothing assigned does nothing.
    async fn reset(&mut self);

    /// Endpoints resolved by the last distribution
    fn endpoints(&self) -> &[PeerEndpoint];
}

/// How a single peer is handled during distribution
#[async_trait]
pub trait AssignmentPolicy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Resolve the endpoint for one peer, sending it a role if the policy assigns roles
    ///
    /// Returns the endpoint and, when a role was handed out, that role.
    async fn assign(
        &mut self,
        controller: &Controller,
        id: &PeerId,
        info: &PeerInfo,
    ) -> Result<(PeerEndpoint, Option<Role>), DistributionError>;

    /// Forget any per-run state such as alternation counters
    fn restart(&mut self) {}
}

/// Ask `id` to take `role`, mapping a refusal to an assignment error
pub(crate) async fn assign_role(
    controller: &Controller,
    id: &PeerId,
    info: &PeerInfo,
    role: Role,
) -> Result<(), DistributionError> {
    info!("Assigning node {}@{} as {}", info.name, info.host, role);
    controller
        .role_assign(id, role)
        .await
        .map_err(|err| DistributionError::Assignment {
            peer: format!("{}@{}", info.name, info.host),
            role: role.to_string(),
            reason: err.to_string(),
        })
}

/// Distribution life cycle shared by every policy
pub struct Strategy<P> {
    controller: Arc<Controller>,
    policy: P,
    peers: Option<PeerSet>,
    assigned: Vec<(PeerId, PeerInfo)>,
    endpoints: Vec<PeerEndpoint>,
}

impl<P: AssignmentPolicy> Strategy<P> {
    pub fn new(controller: Arc<Controller>, policy: P) -> Self {
        Self {
            controller,
            policy,
            peers: None,
            assigned: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    /// Peer set returned by the last distribution
    pub fn peers(&self) -> Option<&PeerSet> {
        self.peers.as_ref()
    }

    fn add_endpoint(&mut self, endpoint: PeerEndpoint) {
        if !self.endpoints.contains(&endpoint) {
            self.endpoints.push(endpoint);
        }
    }
}

#[async_trait]
impl<P: AssignmentPolicy> DistributionStrategy for Strategy<P> {
    async fn distribute(&mut self, peers: PeerSet) -> Result<PeerSet, DistributionError> {
        if peers.available() == 0 {
            return Err(DistributionError::NoPeers);
        }

        if self.endpoints.is_empty() {
            info!(
                "Distributing {} with the {} policy",
                peers,
                self.policy.name()
            );
            for (id, info) in peers.iter() {
                let (endpoint, role) = self.policy.assign(&self.controller, id, info).await?;
                if let Some(role) = role {
                    self.assigned.push((id.clone(), info.with_role(role)));
                }
                self.add_endpoint(endpoint);
            }
        }

        let refreshed = self.controller.peers().await?;
        if refreshed.workers() == 0 {
            return Err(DistributionError::NoWorkers);
        }

        self.peers = Some(refreshed.clone());
        Ok(refreshed)
    }

    async fn reset(&mut self) {
        if self.endpoints.is_empty() && self.assigned.is_empty() {
            return;
        }

        for (id, info) in std::mem::take(&mut self.assigned) {
            if !info.is_worker() {
                continue;
            }
            info!("Unassigning node {}@{} as {}", info.name, info.host, info.role);
            if let Err(err) = self.controller.role_unassign(&id).await {
                error!(
                    "Unable to unassign node {}@{} as {}: {}",
                    info.name, info.host, info.role, err
                );
            }
        }

        self.peers = None;
        self.endpoints.clear();
        self.policy.restart();
    }

    fn endpoints(&self) -> &[PeerEndpoint] {
        &self.endpoints
    }
}

pub type BalancedStrategy = Strategy<Balanced>;
pub type ExclusiveBalancedStrategy = Strategy<ExclusiveBalanced>;
pub type LegacyStrategy = Strategy<Legacy>;
pub type NonAssigningStrategy = Strategy<NonAssigning>;

/// Build the strategy selected in configuration
pub fn strategy_for(
    kind: DistributionKind,
    controller: Arc<Controller>,
) -> Box<dyn DistributionStrategy> {
    match kind {
        DistributionKind::Balanced => Box::new(Strategy::new(controller, Balanced::default())),
        DistributionKind::ExclusiveBalanced => {
            Box::new(Strategy::new(controller, ExclusiveBalanced::default()))
        }
        DistributionKind::Legacy => Box::new(Strategy::new(controller, Legacy)),
        DistributionKind::NonAssigning => Box::new(Strategy::new(controller, NonAssigning)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use conductor_config::{ExchangeConfig, LabConfig};
    use conductor_exchange::{Controller, Lab, MemoryBroker};
    use conductor_protocol::Topics;
    use std::sync::Arc;
    use std::time::Duration;

    pub struct Fixture {
        pub broker: MemoryBroker,
        pub controller: Arc<Controller>,
        pub lab: Lab,
    }

    pub fn exchange_config() -> ExchangeConfig {
        let mut config = ExchangeConfig::default();
        config.reply_timeout = Duration::from_millis(500);
        config.collect_wait = Duration::from_millis(20);
        config.collect_retries = 3;
        config.reconnect.jitter = false;
        config
    }

    pub async fn fixture(workers: usize, inspectors: usize, preassigned: bool) -> Fixture {
        let lab = LabConfig {
            workers,
            inspectors,
            run_time: Duration::from_millis(20),
            ..LabConfig::default()
        };
        lab_fixture(&lab, preassigned).await
    }

    pub async fn lab_fixture(lab_config: &LabConfig, preassigned: bool) -> Fixture {
        let broker = MemoryBroker::new();
        let config = exchange_config();
        let controller = Arc::new(
            Controller::connect(Arc::new(broker.transport()), &config)
                .await
                .unwrap(),
        );
        let lab = Lab::start(
            &broker,
            &Topics::new(config.topic_root.as_str()),
            lab_config,
            preassigned,
        )
        .await
        .unwrap();
        Fixture {
            broker,
            controller,
            lab,
        }
    }
}
