//! Peer identity and roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ProtocolError;

/// The function a peer currently performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    Other,
    Sender,
    Receiver,
    Inspector,
    Agent,
    Exporter,
    ReportsServer,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Other,
        Role::Sender,
        Role::Receiver,
        Role::Inspector,
        Role::Agent,
        Role::Exporter,
        Role::ReportsServer,
    ];

    /// Wire tag for this role
    pub fn code(self) -> u8 {
        match self {
            Role::Other => 0,
            Role::Sender => 1,
            Role::Receiver => 2,
            Role::Inspector => 3,
            Role::Agent => 4,
            Role::Exporter => 5,
            Role::ReportsServer => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Role> {
        Role::ALL.into_iter().find(|role| role.code() == code)
    }

    /// Only senders and receivers generate load
    pub fn is_worker(self) -> bool {
        matches!(self, Role::Sender | Role::Receiver)
    }

    /// Roles a distribution policy may replace; observers keep theirs
    pub fn is_assignable(self) -> bool {
        matches!(self, Role::Other | Role::Sender | Role::Receiver)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Other => "other",
            Role::Sender => "sender",
            Role::Receiver => "receiver",
            Role::Inspector => "inspector",
            Role::Agent => "agent",
            Role::Exporter => "exporter",
            Role::ReportsServer => "reports-server",
        }
    }

    /// Derive a role from a self-declared peer name such as `sender@host-1`
    ///
    /// Names that do not start with a known role resolve to [`Role::Other`].
    pub fn from_peer_name(name: &str) -> Role {
        let prefix = name.split(['@', '-', '.']).next().unwrap_or_default();
        match prefix.to_ascii_lowercase().as_str() {
            "reports" => Role::ReportsServer,
            other => other.parse().unwrap_or(Role::Other),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "other" => Ok(Role::Other),
            "sender" => Ok(Role::Sender),
            "receiver" => Ok(Role::Receiver),
            "inspector" => Ok(Role::Inspector),
            "agent" => Ok(Role::Agent),
            "exporter" => Ok(Role::Exporter),
            "reports-server" | "reportsserver" => Ok(Role::ReportsServer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Unique identifier of a connected peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a random peer id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a peer id, rejecting values that would escape its topic segment
    pub fn parse(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        if value.is_empty() || value.contains(['/', '#', '+']) {
            return Err(ProtocolError::malformed(format!(
                "invalid peer id '{}'",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity a peer announces: logical name, host and role
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub host: String,
    pub role: Role,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>, host: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            role,
        }
    }

    pub fn is_worker(&self) -> bool {
        self.role.is_worker()
    }

    /// The same peer announcing a different role
    pub fn with_role(&self, role: Role) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.host, self.role)
    }
}

/// Sender of a note: its id plus the identity it announced
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub info: PeerInfo,
}

impl PeerIdentity {
    pub fn new(id: PeerId, info: PeerInfo) -> Self {
        Self { id, info }
    }
}
