use async_trait::async_trait;
use conductor_exchange::Controller;
use conductor_protocol::{PeerId, PeerInfo, Role};

use super::{AssignmentPolicy, PeerEndpoint};
use crate::error::DistributionError;

/// Read-only distribution: peers are addressed under the role they declared
#[derive(Debug, Default, Clone, Copy)]
pub struct NonAssigning;

#[async_trait]
impl AssignmentPolicy for NonAssigning {
    fn name(&self) -> &'static str {
        "non-assigning"
    }

    async fn assign(
        &mut self,
        controller: &Controller,
        _id: &PeerId,
        info: &PeerInfo,
    ) -> Result<(PeerEndpoint, Option<Role>), DistributionError> {
        Ok((
            PeerEndpoint::new(info.role, controller.topics().role(info.role)),
            None,
        ))
    }
}
