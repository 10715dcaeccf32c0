//! Defines the topic paths used to address peers and the controller.
//!
//! Every peer subscribes to the all-peers topic, the topic of its current role
//! and its own peer topic, so a note can be broadcast, sent to a role or sent
//! to exactly one peer without changing the note itself.

use serde::{Deserialize, Serialize};

use crate::peer::{PeerId, Role};

// Default namespace all topics live under.
pub const DEFAULT_ROOT: &str = "conductor";

// The topic every peer listens on.
const ALL_PEERS_SEGMENT: &str = "all-peers";

// Role topics live under this segment, one per role.
const ROLE_SEGMENT: &str = "role";

// Unicast topics live under this segment, one per peer id.
const PEER_SEGMENT: &str = "peer";

// The topic on which peers publish test outcomes.
const NOTIFICATIONS_SEGMENT: &str = "notifications";

// The topic on which peers ship log chunks.
const LOGS_SEGMENT: &str = "logs";

// The topic on which peers publish responses to controller requests.
const RESPONSES_SEGMENT: &str = "responses";

/// Builds topic strings under a common root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topics {
    root: String,
}

impl Topics {
    pub fn new(root: impl Into<String>) -> Self {
        let root: String = root.into();
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Broadcast to every connected peer
    pub fn all_peers(&self) -> String {
        format!("{}/{}", self.root, ALL_PEERS_SEGMENT)
    }

    /// Broadcast to every peer currently holding `role`
    pub fn role(&self, role: Role) -> String {
        format!("{}/{}/{}", self.root, ROLE_SEGMENT, role.as_str())
    }

    /// Unicast to a single peer
    pub fn peer(&self, peer_id: &PeerId) -> String {
        format!("{}/{}/{}", self.root, PEER_SEGMENT, peer_id.as_str())
    }

    pub fn notifications(&self) -> String {
        format!("{}/{}", self.root, NOTIFICATIONS_SEGMENT)
    }

    pub fn logs(&self) -> String {
        format!("{}/{}", self.root, LOGS_SEGMENT)
    }

    /// Where peers answer controller requests
    pub fn responses(&self) -> String {
        format!("{}/{}", self.root, RESPONSES_SEGMENT)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("/mpt/");
        assert_eq!(topics.all_peers(), "/mpt/all-peers");
        assert_eq!(topics.role(Role::Sender), "/mpt/role/sender");
        assert_eq!(topics.role(Role::ReportsServer), "/mpt/role/reports-server");
        assert_eq!(
            topics.peer(&PeerId::parse("abc").unwrap()),
            "/mpt/peer/abc"
        );
        assert_eq!(topics.notifications(), "/mpt/notifications");
        assert_eq!(topics.logs(), "/mpt/logs");
        assert_eq!(topics.responses(), "/mpt/responses");
    }

    #[test]
    fn test_addressing_is_deterministic() {
        let id = PeerId::generate();
        assert_eq!(Topics::default().peer(&id), Topics::default().peer(&id));
    }

    #[test]
    fn test_no_collisions_between_peers_and_roles() {
        let topics = Topics::default();
        let mut seen = HashSet::new();

        for role in Role::ALL {
            assert!(seen.insert(topics.role(role)));
        }
        for _ in 0..500 {
            assert!(seen.insert(topics.peer(&PeerId::generate())));
        }
        for topic in [
            topics.all_peers(),
            topics.notifications(),
            topics.logs(),
            topics.responses(),
        ] {
            assert!(seen.insert(topic));
        }
    }
}
