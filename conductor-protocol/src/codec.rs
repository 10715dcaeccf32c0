//! Binary note codec
//!
//! A note is written as a sequence of CBOR values with no field names:
//!
//! ```text
//! [note type][command][correlation id][message id][peer id][name][host][role][payload...]
//! ```
//!
//! Every value carries its CBOR type tag. Fixed-width numeric payload fields
//! are 8-byte little-endian byte strings.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_cbor::Value;
use std::collections::VecDeque;

use crate::correlation::{CorrelationId, MessageId};
use crate::error::ProtocolError;
use crate::note::{
    Command, DrainOrder, GetOption, Layout, LogChunk, LogLocation, Note, NoteType, Payload,
    SetOption, StatsReport,
};
use crate::peer::{PeerId, PeerIdentity, PeerInfo, Role};

/// Encode a note into its wire representation
pub fn encode(note: &Note) -> Result<Bytes, ProtocolError> {
    let expected = Payload::expected_for(note.note_type, note.command).ok_or_else(|| {
        ProtocolError::malformed(format!(
            "{:?} is not a valid {:?} command",
            note.command, note.note_type
        ))
    })?;
    if expected != note.payload.layout() {
        return Err(ProtocolError::malformed(format!(
            "{:?}/{:?} cannot carry a {:?} payload",
            note.note_type,
            note.command,
            note.payload.layout()
        )));
    }

    let mut writer = NoteWriter::default();
    writer.tag(note.note_type.code());
    writer.tag(note.command.code());
    writer.text(note.correlation_id.as_str());
    writer.text(note.message_id.as_str());
    writer.text(note.origin.id.as_str());
    writer.text(&note.origin.info.name);
    writer.text(&note.origin.info.host);
    writer.tag(note.origin.info.role.code());

    match &note.payload {
        Payload::Empty => {}
        Payload::Message(message) => writer.text(message),
        Payload::Ping { sec, usec } => {
            writer.fixed_u64(*sec);
            writer.fixed_u64(*usec);
        }
        Payload::Pong { elapsed_micros } => writer.fixed_u64(*elapsed_micros),
        Payload::Set { option, value } => {
            writer.tag(option.code());
            writer.text(value);
        }
        Payload::Get(option) => writer.tag(option.code()),
        Payload::GetReply { option, value } => {
            writer.tag(option.code());
            writer.text(value);
        }
        Payload::Role(role) => writer.tag(role.code()),
        Payload::Stats(report) => {
            writer.integer(report.child_count);
            writer.text(&report.role_info);
            writer.integer(report.stats_type);
            writer.text(&report.timestamp);
            writer.fixed_u64(report.count);
            writer.fixed_f64(report.rate);
            writer.fixed_f64(report.latency);
        }
        Payload::UserCommand { option, value } => {
            writer.integer(*option);
            writer.text(value);
        }
        Payload::AgentSource { url, branch } => {
            writer.text(url);
            writer.text(branch);
        }
        Payload::LogRequest {
            location,
            type_name,
        } => {
            writer.tag(location.code());
            writer.text(type_name);
        }
        Payload::LogChunk(chunk) => {
            writer.tag(chunk.location.code());
            writer.text(&chunk.file_name);
            writer.integer(chunk.index);
            writer.integer(chunk.total);
            writer.fixed_u64(chunk.file_size);
            writer.text(&chunk.file_hash);
            writer.bytes(&chunk.data);
        }
        Payload::Drain(order) => {
            writer.text(&order.duration);
            writer.text(&order.url);
            writer.integer(order.parallel_count);
            writer.text(&order.worker_name);
        }
        Payload::DrainComplete {
            successful,
            message,
        } => {
            writer.boolean(*successful);
            writer.text(message);
        }
    }

    writer.finish()
}

/// Decode a note from its wire representation
///
/// Unknown tags and payloads that do not match their command fail with
/// [`ProtocolError::MalformedNote`]; input that ends early fails with
/// [`ProtocolError::Io`].
pub fn decode(bytes: &[u8]) -> Result<Note, ProtocolError> {
    let mut reader = NoteReader::new(bytes)?;

    let type_code = reader.tag("note type")?;
    let note_type = NoteType::from_code(type_code)
        .ok_or_else(|| ProtocolError::malformed(format!("unknown note type {}", type_code)))?;
    let command_code = reader.tag("command")?;
    let command = Command::from_code(command_code)
        .ok_or_else(|| ProtocolError::malformed(format!("unknown command {}", command_code)))?;
    let layout = Payload::expected_for(note_type, command).ok_or_else(|| {
        ProtocolError::malformed(format!("{:?} is not a valid {:?} command", command, note_type))
    })?;

    let correlation_id = CorrelationId::from_string(reader.text("correlation id")?);
    let message_id = MessageId::from_string(reader.text("message id")?);
    let peer_id = PeerId::parse(reader.text("peer id")?)?;
    let name = reader.text("peer name")?;
    let host = reader.text("peer host")?;
    let role = read_role(&mut reader)?;

    let payload = match layout {
        Layout::Empty => Payload::Empty,
        Layout::Message => Payload::Message(reader.text("message")?),
        Layout::Ping => Payload::Ping {
            sec: reader.fixed_u64("ping seconds")?,
            usec: reader.fixed_u64("ping microseconds")?,
        },
        Layout::Pong => Payload::Pong {
            elapsed_micros: reader.fixed_u64("elapsed time")?,
        },
        Layout::Set => {
            let code = reader.tag("set option")?;
            let option = SetOption::from_code(code)
                .ok_or_else(|| ProtocolError::malformed(format!("unknown set option {}", code)))?;
            Payload::Set {
                option,
                value: reader.text("set value")?,
            }
        }
        Layout::Get => Payload::Get(read_get_option(&mut reader)?),
        Layout::GetReply => Payload::GetReply {
            option: read_get_option(&mut reader)?,
            value: reader.text("get value")?,
        },
        Layout::Role => Payload::Role(read_role(&mut reader)?),
        Layout::Stats => Payload::Stats(StatsReport {
            child_count: reader.integer("child count")?,
            role_info: reader.text("role info")?,
            stats_type: reader.integer("stats type")?,
            timestamp: reader.text("timestamp")?,
            count: reader.fixed_u64("count")?,
            rate: reader.fixed_f64("rate")?,
            latency: reader.fixed_f64("latency")?,
        }),
        Layout::UserCommand => Payload::UserCommand {
            option: reader.integer("user option")?,
            value: reader.text("user value")?,
        },
        Layout::AgentSource => Payload::AgentSource {
            url: reader.text("source url")?,
            branch: reader.text("source branch")?,
        },
        Layout::LogRequest => Payload::LogRequest {
            location: read_log_location(&mut reader)?,
            type_name: reader.text("log type")?,
        },
        Layout::LogChunk => Payload::LogChunk(LogChunk {
            location: read_log_location(&mut reader)?,
            file_name: reader.text("file name")?,
            index: reader.integer("chunk index")?,
            total: reader.integer("chunk total")?,
            file_size: reader.fixed_u64("file size")?,
            file_hash: reader.text("file hash")?,
            data: reader.bytes("chunk data")?,
        }),
        Layout::Drain => Payload::Drain(DrainOrder {
            duration: reader.text("drain duration")?,
            url: reader.text("drain url")?,
            parallel_count: reader.integer("drain parallel count")?,
            worker_name: reader.text("drain worker name")?,
        }),
        Layout::DrainComplete => Payload::DrainComplete {
            successful: reader.boolean("drain result")?,
            message: reader.text("drain message")?,
        },
    };

    reader.finish()?;

    Ok(Note {
        note_type,
        command,
        correlation_id,
        message_id,
        origin: PeerIdentity::new(peer_id, PeerInfo::new(name, host, role)),
        payload,
    })
}

fn read_role(reader: &mut NoteReader) -> Result<Role, ProtocolError> {
    let code = reader.tag("role")?;
    Role::from_code(code).ok_or_else(|| ProtocolError::malformed(format!("unknown role {}", code)))
}

fn read_get_option(reader: &mut NoteReader) -> Result<GetOption, ProtocolError> {
    let code = reader.tag("get option")?;
    GetOption::from_code(code)
        .ok_or_else(|| ProtocolError::malformed(format!("unknown get option {}", code)))
}

fn read_log_location(reader: &mut NoteReader) -> Result<LogLocation, ProtocolError> {
    let code = reader.tag("log location")?;
    LogLocation::from_code(code)
        .ok_or_else(|| ProtocolError::malformed(format!("unknown log location {}", code)))
}

#[derive(Default)]
struct NoteWriter {
    values: Vec<Value>,
}

impl NoteWriter {
    fn tag(&mut self, code: u8) {
        self.values.push(Value::Integer(i128::from(code)));
    }

    fn integer(&mut self, value: impl Into<i128>) {
        self.values.push(Value::Integer(value.into()));
    }

    fn text(&mut self, value: &str) {
        self.values.push(Value::Text(value.to_string()));
    }

    fn boolean(&mut self, value: bool) {
        self.values.push(Value::Bool(value));
    }

    fn bytes(&mut self, value: &[u8]) {
        self.values.push(Value::Bytes(value.to_vec()));
    }

    fn fixed_u64(&mut self, value: u64) {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u64_le(value);
        self.values.push(Value::Bytes(buf.to_vec()));
    }

    fn fixed_f64(&mut self, value: f64) {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_f64_le(value);
        self.values.push(Value::Bytes(buf.to_vec()));
    }

    fn finish(self) -> Result<Bytes, ProtocolError> {
        let mut out = Vec::new();
        for value in &self.values {
            serde_cbor::to_writer(&mut out, value)
                .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        }
        Ok(Bytes::from(out))
    }
}

struct NoteReader {
    values: VecDeque<Value>,
}

impl NoteReader {
    fn new(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut values = VecDeque::new();
        for value in serde_cbor::Deserializer::from_slice(bytes).into_iter::<Value>() {
            values.push_back(value?);
        }
        Ok(Self { values })
    }

    fn next(&mut self, what: &str) -> Result<Value, ProtocolError> {
        self.values
            .pop_front()
            .ok_or_else(|| ProtocolError::truncated(what))
    }

    fn tag(&mut self, what: &str) -> Result<u8, ProtocolError> {
        self.integer(what)
    }

    fn integer<T: TryFrom<i128>>(&mut self, what: &str) -> Result<T, ProtocolError> {
        match self.next(what)? {
            Value::Integer(value) => T::try_from(value).map_err(|_| {
                ProtocolError::malformed(format!("{} out of range: {}", what, value))
            }),
            other => Err(unexpected(what, "integer", &other)),
        }
    }

    fn text(&mut self, what: &str) -> Result<String, ProtocolError> {
        match self.next(what)? {
            Value::Text(value) => Ok(value),
            other => Err(unexpected(what, "text", &other)),
        }
    }

    fn boolean(&mut self, what: &str) -> Result<bool, ProtocolError> {
        match self.next(what)? {
            Value::Bool(value) => Ok(value),
            other => Err(unexpected(what, "bool", &other)),
        }
    }

    fn bytes(&mut self, what: &str) -> Result<Vec<u8>, ProtocolError> {
        match self.next(what)? {
            Value::Bytes(value) => Ok(value),
            other => Err(unexpected(what, "bytes", &other)),
        }
    }

    fn fixed(&mut self, what: &str) -> Result<[u8; 8], ProtocolError> {
        let raw = self.bytes(what)?;
        raw.as_slice().try_into().map_err(|_| {
            ProtocolError::malformed(format!("{} must be 8 bytes, got {}", what, raw.len()))
        })
    }

    fn fixed_u64(&mut self, what: &str) -> Result<u64, ProtocolError> {
        let raw = self.fixed(what)?;
        Ok(raw.as_slice().get_u64_le())
    }

    fn fixed_f64(&mut self, what: &str) -> Result<f64, ProtocolError> {
        let raw = self.fixed(what)?;
        Ok(raw.as_slice().get_f64_le())
    }

    fn finish(self) -> Result<(), ProtocolError> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::malformed(format!(
                "{} unexpected trailing values",
                self.values.len()
            )))
        }
    }
}

fn unexpected(what: &str, expected: &str, found: &Value) -> ProtocolError {
    ProtocolError::malformed(format!("{} should be {}, found {:?}", what, expected, found))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(role: Role) -> PeerIdentity {
        PeerIdentity::new(
            PeerId::generate(),
            PeerInfo::new("worker-1", "host-a", role),
        )
    }

    fn round_trip(note: &Note) -> Note {
        let bytes = encode(note).unwrap();
        decode(&bytes).unwrap()
    }

    fn sample_notes() -> Vec<Note> {
        let ping = Note::request(Command::Ping, origin(Role::Other), Payload::ping_now());
        let start = Note::request(Command::StartSender, origin(Role::Other), Payload::Empty);
        vec![
            ping.clone(),
            Note::response_to(
                &ping,
                Command::Ping,
                origin(Role::Sender),
                Payload::Pong { elapsed_micros: 1_234 },
            ),
            Note::request(
                Command::Set,
                origin(Role::Other),
                Payload::Set {
                    option: SetOption::Rate,
                    value: "100".to_string(),
                },
            ),
            Note::request(
                Command::Get,
                origin(Role::Other),
                Payload::Get(GetOption::DataServer),
            ),
            Note::response_to(
                &start,
                Command::Get,
                origin(Role::Receiver),
                Payload::GetReply {
                    option: GetOption::DataServer,
                    value: "http://host-a:8000/".to_string(),
                },
            ),
            Note::request(
                Command::RoleAssign,
                origin(Role::Other),
                Payload::Role(Role::Receiver),
            ),
            start.clone(),
            Note::response_to(&start, Command::Ok, origin(Role::Sender), Payload::Empty),
            Note::response_to(
                &start,
                Command::InternalError,
                origin(Role::Sender),
                Payload::Message("boom".to_string()),
            ),
            Note::response_to(
                &start,
                Command::Stats,
                origin(Role::Sender),
                Payload::Stats(StatsReport {
                    child_count: 4,
                    role_info: "sender".to_string(),
                    stats_type: 0,
                    timestamp: "1700000000".to_string(),
                    count: 42_000,
                    rate: 99.5,
                    latency: 12.25,
                }),
            ),
            Note::request(
                Command::UserCommand,
                origin(Role::Other),
                Payload::UserCommand {
                    option: -7,
                    value: "custom".to_string(),
                },
            ),
            Note::request(
                Command::AgentSource,
                origin(Role::Other),
                Payload::AgentSource {
                    url: "https://example.com/scripts.git".to_string(),
                    branch: "main".to_string(),
                },
            ),
            Note::request(
                Command::Log,
                origin(Role::Other),
                Payload::LogRequest {
                    location: LogLocation::LastFailed,
                    type_name: "receiver".to_string(),
                },
            ),
            Note::response_to(
                &start,
                Command::Log,
                origin(Role::Receiver),
                Payload::LogChunk(LogChunk {
                    location: LogLocation::Last,
                    file_name: "receiver.dat".to_string(),
                    index: 0,
                    total: 2,
                    file_size: 1 << 33,
                    file_hash: "abc123".to_string(),
                    data: vec![0, 1, 2, 255],
                }),
            ),
            Note::request(
                Command::Drain,
                origin(Role::Other),
                Payload::Drain(DrainOrder {
                    duration: "30s".to_string(),
                    url: "amqp://sut:5672/queue".to_string(),
                    parallel_count: 2,
                    worker_name: "receiver".to_string(),
                }),
            ),
            Note::notification_for(
                &start,
                Command::NotifySuccess,
                origin(Role::Sender),
                Payload::Message("test completed".to_string()),
            ),
            Note::notification_for(
                &start,
                Command::DrainComplete,
                origin(Role::Receiver),
                Payload::DrainComplete {
                    successful: false,
                    message: "queue not empty".to_string(),
                },
            ),
        ]
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        for note in sample_notes() {
            assert_eq!(round_trip(&note), note, "round trip of {}", note);
        }
    }

    #[test]
    fn test_fixed_width_fields_are_little_endian() {
        let note = Note::request(
            Command::Ping,
            origin(Role::Other),
            Payload::Ping { sec: 1, usec: 2 },
        );
        let bytes = encode(&note).unwrap();
        let values: Vec<Value> = serde_cbor::Deserializer::from_slice(&bytes)
            .into_iter::<Value>()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(values[0], Value::Integer(0));
        assert_eq!(values[1], Value::Integer(10));
        assert_eq!(values[8], Value::Bytes(vec![1, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(values[9], Value::Bytes(vec![2, 0, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn test_encode_rejects_mismatched_payload() {
        let note = Note::request(
            Command::Ping,
            origin(Role::Other),
            Payload::Message("not a ping".to_string()),
        );
        assert!(encode(&note).unwrap_err().is_malformed());

        let mut ok_request = Note::request(Command::Halt, origin(Role::Other), Payload::Empty);
        ok_request.command = Command::Ok;
        assert!(encode(&ok_request).unwrap_err().is_malformed());
    }

    #[test]
    fn test_decode_rejects_unknown_tags() {
        let note = Note::request(Command::Halt, origin(Role::Other), Payload::Empty);
        let mut bytes = encode(&note).unwrap().to_vec();

        // second value is the command tag; 20 is unassigned
        bytes[1] = 20;
        assert!(decode(&bytes).unwrap_err().is_malformed());

        // first value is the note type tag
        let mut bytes = encode(&note).unwrap().to_vec();
        bytes[0] = 7;
        assert!(decode(&bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn test_decode_rejects_invalid_type_command_pair() {
        let request = Note::request(Command::Halt, origin(Role::Other), Payload::Empty);
        let mut bytes = encode(&request).unwrap().to_vec();
        // Halt as a notification does not exist
        bytes[0] = NoteType::Notification.code();
        assert!(decode(&bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn test_truncated_note_is_an_io_error() {
        let note = Note::request(
            Command::Set,
            origin(Role::Other),
            Payload::Set {
                option: SetOption::Broker,
                value: "amqp://localhost:5672/test.queue".to_string(),
            },
        );
        let bytes = encode(&note).unwrap();

        for cut in [1, bytes.len() / 2, bytes.len() - 1] {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(err.is_truncated(), "cut at {} gave {}", cut, err);
            assert!(!err.is_malformed());
        }
        assert!(decode(&[]).unwrap_err().is_truncated());
    }

    #[test]
    fn test_trailing_values_are_malformed() {
        let note = Note::request(Command::Flush, origin(Role::Other), Payload::Empty);
        let mut bytes = encode(&note).unwrap().to_vec();
        serde_cbor::to_writer(&mut bytes, &Value::Integer(1)).unwrap();
        assert!(decode(&bytes).unwrap_err().is_malformed());
    }
}
