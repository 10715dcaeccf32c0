//! Control-plane protocol for Conductor
//!
//! This crate defines the notes exchanged between the controller and its
//! peers, the compact binary encoding used on the wire, and the topic
//! namespace used to address peers by role or individually.

pub mod codec;
pub mod correlation;
pub mod error;
pub mod note;
pub mod peer;
pub mod topics;

// Re-export commonly used types
pub use codec::{decode, encode};
pub use correlation::{CorrelationId, MessageId};
pub use error::ProtocolError;
pub use note::{
    Command, DrainOrder, GetOption, LogChunk, LogLocation, Note, NoteType, Payload, SetOption,
    StatsReport,
};
pub use peer::{PeerId, PeerIdentity, PeerInfo, Role};
pub use topics::Topics;
