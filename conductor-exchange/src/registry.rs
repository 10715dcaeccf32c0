//! Peer membership

use conductor_protocol::{Command, Note, PeerId, PeerIdentity, PeerInfo};
use parking_lot::Mutex;
use std::fmt;
use tracing::debug;

/// Immutable snapshot of the peers known at one point in time
///
/// Iteration follows the order in which peers were first observed; the
/// distribution strategies rely on it for role tie-breaking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
    entries: Vec<(PeerId, PeerInfo)>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers of any role
    pub fn available(&self) -> usize {
        self.entries.len()
    }

    /// Number of peers holding a worker role
    pub fn workers(&self) -> usize {
        self.entries.iter().filter(|(_, info)| info.is_worker()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerInfo> {
        self.entries
            .iter()
            .find(|(peer, _)| peer == id)
            .map(|(_, info)| info)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerInfo)> {
        self.entries.iter().map(|(id, info)| (id, info))
    }

    /// Peers currently holding a worker role
    pub fn worker_peers(&self) -> impl Iterator<Item = (&PeerId, &PeerInfo)> {
        self.iter().filter(|(_, info)| info.is_worker())
    }
}

impl FromIterator<(PeerId, PeerInfo)> for PeerSet {
    /// Later entries for an id replace earlier ones but keep the first position
    fn from_iter<I: IntoIterator<Item = (PeerId, PeerInfo)>>(iter: I) -> Self {
        let mut entries: Vec<(PeerId, PeerInfo)> = Vec::new();
        for (id, info) in iter {
            match entries.iter_mut().find(|(existing, _)| *existing == id) {
                Some(entry) => entry.1 = info,
                None => entries.push((id, info)),
            }
        }
        Self { entries }
    }
}

impl fmt::Display for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} peers ({} workers)",
            self.available(),
            self.workers()
        )
    }
}

/// Live view of peer announcements, fed by the receive task
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<Vec<(PeerId, PeerInfo)>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what an inbound note says about its sender
    ///
    /// Ping replies announce a peer (or its new role); an abnormal disconnect
    /// removes it.
    pub fn observe(&self, note: &Note) {
        match (note.is_notification(), note.command) {
            (true, Command::AbnormalDisconnect) => self.forget(&note.origin.id),
            (false, Command::Ping) if note.is_response() => self.announce(&note.origin),
            _ => {}
        }
    }

    pub fn announce(&self, identity: &PeerIdentity) {
        let mut peers = self.peers.lock();
        match peers.iter_mut().find(|(id, _)| *id == identity.id) {
            Some(entry) => entry.1 = identity.info.clone(),
            None => {
                debug!("Peer {} announced as {}", identity.id, identity.info);
                peers.push((identity.id.clone(), identity.info.clone()));
            }
        }
    }

    pub fn forget(&self, id: &PeerId) {
        let mut peers = self.peers.lock();
        let before = peers.len();
        peers.retain(|(peer, _)| peer != id);
        if peers.len() != before {
            debug!("Peer {} left", id);
        }
    }

    /// Copy of the current membership
    pub fn snapshot(&self) -> PeerSet {
        PeerSet {
            entries: self.peers.lock().clone(),
        }
    }
}
