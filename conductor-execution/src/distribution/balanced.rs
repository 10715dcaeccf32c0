use async_trait::async_trait;
use conductor_exchange::Controller;
use conductor_protocol::{PeerId, PeerInfo, Role};

use super::{assign_role, AssignmentPolicy, PeerEndpoint};
use crate::error::DistributionError;

/// Role for the Nth assignable peer: receivers on even turns, senders on odd
fn alternate(counter: &mut usize) -> Role {
    let role = if *counter % 2 == 0 {
        Role::Receiver
    } else {
        Role::Sender
    };
    *counter += 1;
    role
}

/// Alternates assignable peers between receiver and sender, addressing
/// every role through its shared role topic
#[derive(Debug, Default)]
pub struct Balanced {
    counter: usize,
}

#[async_trait]
impl AssignmentPolicy for Balanced {
    fn name(&self) -> &'static str {
        "balanced"
    }

    async fn assign(
        &mut self,
        controller: &Controller,
        id: &PeerId,
        info: &PeerInfo,
    ) -> Result<(PeerEndpoint, Option<Role>), DistributionError> {
        let topics = controller.topics();
        if !info.role.is_assignable() {
            return Ok((PeerEndpoint::new(info.role, topics.role(info.role)), None));
        }

        let role = alternate(&mut self.counter);
        assign_role(controller, id, info, role).await?;
        Ok((PeerEndpoint::new(role, topics.role(role)), Some(role)))
    }

    fn restart(&mut self) {
        self.counter = 0;
    }
}

/// Same alternation as [`Balanced`], but every peer is addressed on its own
/// topic so it can be configured individually
#[derive(Debug, Default)]
pub struct ExclusiveBalanced {
    counter: usize,
}

#[async_trait]
impl AssignmentPolicy for ExclusiveBalanced {
    fn name(&self) -> &'static str {
        "exclusive-balanced"
    }

    async fn assign(
        &mut self,
        controller: &Controller,
        id: &PeerId,
        info: &PeerInfo,
    ) -> Result<(PeerEndpoint, Option<Role>), DistributionError> {
        let topic = controller.topics().peer(id);
        if !info.role.is_assignable() {
            return Ok((PeerEndpoint::new(info.role, topic), None));
        }

        let role = alternate(&mut self.counter);
        assign_role(controller, id, info, role).await?;
        Ok((PeerEndpoint::new(role, topic), Some(role)))
    }

    fn restart(&mut self) {
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::testing::fixture;
    use crate::distribution::{DistributionStrategy, Strategy};

    #[test]
    fn test_alternation_starts_with_receiver() {
        let mut counter = 0;
        let roles: Vec<Role> = (0..5).map(|_| alternate(&mut counter)).collect();
        assert_eq!(
            roles,
            vec![
                Role::Receiver,
                Role::Sender,
                Role::Receiver,
                Role::Sender,
                Role::Receiver
            ]
        );
    }

    #[tokio::test]
    async fn test_balanced_parity_with_observers() {
        let fixture = fixture(5, 2, false).await;
        let mut strategy = Strategy::new(fixture.controller.clone(), Balanced::default());

        let peers = fixture.controller.peers().await.unwrap();
        assert_eq!(peers.available(), 7);
        let distributed = strategy.distribute(peers).await.unwrap();

        let count = |role: Role| distributed.iter().filter(|(_, i)| i.role == role).count();
        let receivers = count(Role::Receiver);
        let senders = count(Role::Sender);
        assert_eq!(receivers + senders, 5);
        assert_eq!(receivers, 3);
        assert_eq!(senders, 2);
        assert_eq!(count(Role::Inspector), 2);

        let topics = fixture.controller.topics();
        let mut endpoints = strategy.endpoints().to_vec();
        endpoints.sort_by_key(|e| e.role.code());
        assert_eq!(
            endpoints,
            vec![
                PeerEndpoint::new(Role::Sender, topics.role(Role::Sender)),
                PeerEndpoint::new(Role::Receiver, topics.role(Role::Receiver)),
                PeerEndpoint::new(Role::Inspector, topics.role(Role::Inspector)),
            ]
        );

        strategy.reset().await;
        fixture.lab.shutdown().await;
    }

    #[tokio::test]
    async fn test_exclusive_balanced_uses_peer_topics() {
        let fixture = fixture(4, 1, false).await;
        let mut strategy =
            Strategy::new(fixture.controller.clone(), ExclusiveBalanced::default());

        let peers = fixture.controller.peers().await.unwrap();
        let distributed = strategy.distribute(peers).await.unwrap();
        assert_eq!(distributed.workers(), 4);

        let endpoints = strategy.endpoints();
        assert_eq!(endpoints.len(), 5);
        for (id, info) in distributed.iter() {
            let topic = fixture.controller.topics().peer(id);
            assert!(endpoints
                .iter()
                .any(|e| e.topic == topic && e.role == info.role));
        }
        assert_eq!(
            endpoints.iter().filter(|e| e.role == Role::Receiver).count(),
            2
        );

        strategy.reset().await;
        fixture.lab.shutdown().await;
    }
}
