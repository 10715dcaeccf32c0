use async_trait::async_trait;
use conductor_exchange::Controller;
use conductor_protocol::{PeerId, PeerInfo, Role};
use tracing::debug;

use super::{AssignmentPolicy, PeerEndpoint};
use crate::error::DistributionError;

/// Fixed topologies: the role is read from the peer's name (`sender@host`,
/// `receiver-2`, ...) and nothing is assigned
#[derive(Debug, Default, Clone, Copy)]
pub struct Legacy;

#[async_trait]
impl AssignmentPolicy for Legacy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn assign(
        &mut self,
        controller: &Controller,
        _id: &PeerId,
        info: &PeerInfo,
    ) -> Result<(PeerEndpoint, Option<Role>), DistributionError> {
        let role = Role::from_peer_name(&info.name);
        debug!("Node {}@{} is a {} by name", info.name, info.host, role);
        Ok((PeerEndpoint::new(role, controller.topics().role(role)), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::testing::fixture;
    use crate::distribution::{DistributionStrategy, Strategy};

    #[tokio::test]
    async fn test_roles_follow_names() {
        let fixture = fixture(3, 1, true).await;
        let mut strategy = Strategy::new(fixture.controller.clone(), Legacy);

        let peers = fixture.controller.peers().await.unwrap();
        let distributed = strategy.distribute(peers).await.unwrap();
        for (_, info) in distributed.iter() {
            assert_eq!(info.role, Role::from_peer_name(&info.name));
        }

        let mut roles: Vec<Role> = strategy.endpoints().iter().map(|e| e.role).collect();
        roles.sort_by_key(|r| r.code());
        assert_eq!(roles, vec![Role::Sender, Role::Receiver, Role::Inspector]);
        fixture.lab.shutdown().await;
    }
}
