//! Note model
//!
//! A [`Note`] is one protocol message. Its `(NoteType, Command)` pair selects
//! exactly one [`Payload`] layout; see [`Payload::expected_for`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::correlation::{CorrelationId, MessageId};
use crate::peer::{PeerIdentity, Role};

/// Whether a note asks, answers or announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteType {
    Request,
    Response,
    Notification,
}

impl NoteType {
    pub fn code(self) -> u8 {
        match self {
            NoteType::Request => 0,
            NoteType::Response => 1,
            NoteType::Notification => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<NoteType> {
        match code {
            0 => Some(NoteType::Request),
            1 => Some(NoteType::Response),
            2 => Some(NoteType::Notification),
            _ => None,
        }
    }
}

/// Closed set of commands understood by controller and peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    StartReceiver,
    StopReceiver,
    StartSender,
    StopSender,
    StartInspector,
    StopInspector,
    Flush,
    Set,
    Stats,
    Halt,
    Ping,
    Ok,
    ProtocolError,
    InternalError,
    AbnormalDisconnect,
    NotifyFail,
    NotifySuccess,
    Get,
    StartAgent,
    StopAgent,
    AgentSource,
    Log,
    Drain,
    DrainComplete,
    RoleAssign,
    RoleUnassign,
    UserCommand,
}

impl Command {
    pub const ALL: [Command; 27] = [
        Command::StartReceiver,
        Command::StopReceiver,
        Command::StartSender,
        Command::StopSender,
        Command::StartInspector,
        Command::StopInspector,
        Command::Flush,
        Command::Set,
        Command::Stats,
        Command::Halt,
        Command::Ping,
        Command::Ok,
        Command::ProtocolError,
        Command::InternalError,
        Command::AbnormalDisconnect,
        Command::NotifyFail,
        Command::NotifySuccess,
        Command::Get,
        Command::StartAgent,
        Command::StopAgent,
        Command::AgentSource,
        Command::Log,
        Command::Drain,
        Command::DrainComplete,
        Command::RoleAssign,
        Command::RoleUnassign,
        Command::UserCommand,
    ];

    /// Wire tag for this command
    pub fn code(self) -> u8 {
        match self {
            Command::StartReceiver => 0,
            Command::StopReceiver => 1,
            Command::StartSender => 2,
            Command::StopSender => 3,
            Command::StartInspector => 4,
            Command::StopInspector => 5,
            Command::Flush => 6,
            Command::Set => 7,
            Command::Stats => 8,
            Command::Halt => 9,
            Command::Ping => 10,
            Command::Ok => 11,
            Command::ProtocolError => 12,
            Command::InternalError => 13,
            Command::AbnormalDisconnect => 14,
            Command::NotifyFail => 15,
            Command::NotifySuccess => 16,
            Command::Get => 17,
            Command::StartAgent => 18,
            Command::StopAgent => 19,
            Command::AgentSource => 21,
            Command::Log => 22,
            Command::Drain => 23,
            Command::DrainComplete => 24,
            Command::RoleAssign => 25,
            Command::RoleUnassign => 26,
            Command::UserCommand => 30,
        }
    }

    pub fn from_code(code: u8) -> Option<Command> {
        Command::ALL.into_iter().find(|command| command.code() == code)
    }
}

/// Test parameters a controller can push with a `Set` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOption {
    Broker,
    DurationType,
    ParallelCount,
    MessageSize,
    Rate,
    FailConditionLatency,
    ManagementInterface,
}

impl SetOption {
    pub const ALL: [SetOption; 7] = [
        SetOption::Broker,
        SetOption::DurationType,
        SetOption::ParallelCount,
        SetOption::MessageSize,
        SetOption::Rate,
        SetOption::FailConditionLatency,
        SetOption::ManagementInterface,
    ];

    pub fn code(self) -> u8 {
        match self {
            SetOption::Broker => 0,
            SetOption::DurationType => 1,
            SetOption::ParallelCount => 3,
            SetOption::MessageSize => 4,
            SetOption::Rate => 6,
            SetOption::FailConditionLatency => 7,
            SetOption::ManagementInterface => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<SetOption> {
        SetOption::ALL.into_iter().find(|option| option.code() == code)
    }
}

/// Values a controller can query with a `Get` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GetOption {
    DataServer,
}

impl GetOption {
    pub fn code(self) -> u8 {
        match self {
            GetOption::DataServer => 0,
        }
    }

    pub fn from_code(code: u8) -> Option<GetOption> {
        match code {
            0 => Some(GetOption::DataServer),
            _ => None,
        }
    }
}

/// Which test logs a peer should ship back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLocation {
    Last,
    LastSuccessful,
    LastFailed,
    Any,
}

impl LogLocation {
    pub fn code(self) -> u8 {
        match self {
            LogLocation::Last => 0,
            LogLocation::LastSuccessful => 1,
            LogLocation::LastFailed => 2,
            LogLocation::Any => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<LogLocation> {
        match code {
            0 => Some(LogLocation::Last),
            1 => Some(LogLocation::LastSuccessful),
            2 => Some(LogLocation::LastFailed),
            3 => Some(LogLocation::Any),
            _ => None,
        }
    }
}

/// Throughput and latency snapshot reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub child_count: u32,
    pub role_info: String,
    pub stats_type: u16,
    pub timestamp: String,
    pub count: u64,
    pub rate: f64,
    /// Latency in milliseconds
    pub latency: f64,
}

/// One piece of a log file shipped in response to a `Log` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub location: LogLocation,
    pub file_name: String,
    pub index: u32,
    pub total: u32,
    pub file_size: u64,
    pub file_hash: String,
    pub data: Vec<u8>,
}

impl LogChunk {
    /// Upper bound for a single chunk's data
    pub const MAX_CHUNK_SIZE: usize = 10_000_000;

    pub fn is_last(&self) -> bool {
        self.index.saturating_add(1) >= self.total
    }
}

/// Instructs a worker to drain what is left on the broker under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainOrder {
    pub duration: String,
    pub url: String,
    pub parallel_count: u32,
    pub worker_name: String,
}

/// Command-specific note body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Empty,
    Message(String),
    Ping { sec: u64, usec: u64 },
    Pong { elapsed_micros: u64 },
    Set { option: SetOption, value: String },
    Get(GetOption),
    GetReply { option: GetOption, value: String },
    Role(Role),
    Stats(StatsReport),
    UserCommand { option: i64, value: String },
    AgentSource { url: String, branch: String },
    LogRequest { location: LogLocation, type_name: String },
    LogChunk(LogChunk),
    Drain(DrainOrder),
    DrainComplete { successful: bool, message: String },
}

/// Discriminant of [`Payload`], used by the codec dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    Empty,
    Message,
    Ping,
    Pong,
    Set,
    Get,
    GetReply,
    Role,
    Stats,
    UserCommand,
    AgentSource,
    LogRequest,
    LogChunk,
    Drain,
    DrainComplete,
}

impl Payload {
    /// Ping payload stamped with the current wall-clock time
    pub fn ping_now() -> Payload {
        let now = Utc::now();
        Payload::Ping {
            sec: now.timestamp().max(0) as u64,
            usec: u64::from(now.timestamp_subsec_micros()),
        }
    }

    /// Microseconds elapsed since a ping timestamp
    pub fn elapsed_since(sec: u64, usec: u64) -> u64 {
        let now = Utc::now();
        let now_micros = (now.timestamp().max(0) as u64) * 1_000_000
            + u64::from(now.timestamp_subsec_micros());
        now_micros.saturating_sub(sec * 1_000_000 + usec)
    }

    pub(crate) fn layout(&self) -> Layout {
        match self {
            Payload::Empty => Layout::Empty,
            Payload::Message(_) => Layout::Message,
            Payload::Ping { .. } => Layout::Ping,
            Payload::Pong { .. } => Layout::Pong,
            Payload::Set { .. } => Layout::Set,
            Payload::Get(_) => Layout::Get,
            Payload::GetReply { .. } => Layout::GetReply,
            Payload::Role(_) => Layout::Role,
            Payload::Stats(_) => Layout::Stats,
            Payload::UserCommand { .. } => Layout::UserCommand,
            Payload::AgentSource { .. } => Layout::AgentSource,
            Payload::LogRequest { .. } => Layout::LogRequest,
            Payload::LogChunk(_) => Layout::LogChunk,
            Payload::Drain(_) => Layout::Drain,
            Payload::DrainComplete { .. } => Layout::DrainComplete,
        }
    }

    /// The payload layout a `(note_type, command)` pair carries, if the pair exists
    pub(crate) fn expected_for(note_type: NoteType, command: Command) -> Option<Layout> {
        use Command::*;

        match note_type {
            NoteType::Request => match command {
                Ping => Some(Layout::Ping),
                Set => Some(Layout::Set),
                Get => Some(Layout::Get),
                StartInspector => Some(Layout::Message),
                RoleAssign => Some(Layout::Role),
                UserCommand => Some(Layout::UserCommand),
                AgentSource => Some(Layout::AgentSource),
                Log => Some(Layout::LogRequest),
                Drain => Some(Layout::Drain),
                StartReceiver | StopReceiver | StartSender | StopSender | StopInspector
                | Flush | Stats | Halt | StartAgent | StopAgent | RoleUnassign => {
                    Some(Layout::Empty)
                }
                Ok | ProtocolError | InternalError | AbnormalDisconnect | NotifyFail
                | NotifySuccess | DrainComplete => None,
            },
            NoteType::Response => match command {
                Ok | ProtocolError => Some(Layout::Empty),
                InternalError => Some(Layout::Message),
                Ping => Some(Layout::Pong),
                Stats => Some(Layout::Stats),
                Get => Some(Layout::GetReply),
                UserCommand => Some(Layout::UserCommand),
                Log => Some(Layout::LogChunk),
                _ => None,
            },
            NoteType::Notification => match command {
                NotifySuccess | NotifyFail | AbnormalDisconnect => Some(Layout::Message),
                DrainComplete => Some(Layout::DrainComplete),
                _ => None,
            },
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Payload::Message(message) => Some(message),
            Payload::DrainComplete { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// A single protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub note_type: NoteType,
    pub command: Command,
    pub correlation_id: CorrelationId,
    pub message_id: MessageId,
    pub origin: PeerIdentity,
    pub payload: Payload,
}

impl Note {
    /// A new request with its own correlation id
    pub fn request(command: Command, origin: PeerIdentity, payload: Payload) -> Self {
        Self {
            note_type: NoteType::Request,
            command,
            correlation_id: CorrelationId::new(),
            message_id: MessageId::new(),
            origin,
            payload,
        }
    }

    /// A response answering `request`
    pub fn response_to(
        request: &Note,
        command: Command,
        origin: PeerIdentity,
        payload: Payload,
    ) -> Self {
        Self {
            note_type: NoteType::Response,
            command,
            correlation_id: request.correlation_id.clone(),
            message_id: MessageId::new(),
            origin,
            payload,
        }
    }

    /// A notification reporting on `request`
    pub fn notification_for(
        request: &Note,
        command: Command,
        origin: PeerIdentity,
        payload: Payload,
    ) -> Self {
        Self {
            note_type: NoteType::Notification,
            command,
            correlation_id: request.correlation_id.clone(),
            message_id: MessageId::new(),
            origin,
            payload,
        }
    }

    /// A notification that does not answer any request
    pub fn unsolicited(command: Command, origin: PeerIdentity, payload: Payload) -> Self {
        Self {
            note_type: NoteType::Notification,
            command,
            correlation_id: CorrelationId::new(),
            message_id: MessageId::new(),
            origin,
            payload,
        }
    }

    pub fn is_request(&self) -> bool {
        self.note_type == NoteType::Request
    }

    pub fn is_response(&self) -> bool {
        self.note_type == NoteType::Response
    }

    pub fn is_notification(&self) -> bool {
        self.note_type == NoteType::Notification
    }

    /// Whether this note answers the request with the given correlation id
    pub fn answers(&self, correlation_id: &CorrelationId) -> bool {
        !self.is_request() && &self.correlation_id == correlation_id
    }

    /// Success or failure report of a worker run
    pub fn is_test_outcome(&self) -> bool {
        self.is_notification()
            && matches!(self.command, Command::NotifySuccess | Command::NotifyFail)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} [{}] from {}",
            self.note_type, self.command, self.correlation_id, self.origin.info
        )
    }
}
