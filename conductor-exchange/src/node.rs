//! Peer runtime
//!
//! [`PeerNode`] is the peer end of the exchange: it listens on the all-peers
//! topic, its role topic and its own peer topic, answers controller requests
//! and drives a [`Worker`] through start and stop. The worker does the actual
//! load generation; [`SimulatedWorker`] models one for lab runs.

use async_trait::async_trait;
use chrono::Utc;
use conductor_config::LabConfig;
use conductor_protocol::{
    Command, GetOption, LogChunk, LogLocation, Note, Payload, PeerId, PeerIdentity, PeerInfo,
    Role, SetOption, StatsReport, Topics,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ExchangeClient;
use crate::error::ExchangeError;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{ServiceLevel, Transport};

/// Largest slice of a log file shipped in one note
const LOG_CHUNK_SIZE: usize = 64 * 1024;

/// Pause between log chunks so a large bundle does not flood the broker
const LOG_CHUNK_THROTTLE: Duration = Duration::from_millis(5);

const DATA_SERVER_PORT: u16 = 8000;

/// Parameters pushed to a worker with `Set` requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSettings {
    pub broker: Option<String>,
    pub rate: u64,
    pub parallel_count: u32,
    pub message_size: u32,
    pub duration: Option<String>,
    pub fcl_ms: Option<u64>,
    pub management_interface: Option<String>,
}

impl WorkerSettings {
    /// Apply one `Set` option
    pub fn apply(&mut self, option: SetOption, value: &str) -> Result<(), String> {
        fn number<T: std::str::FromStr>(option: SetOption, value: &str) -> Result<T, String> {
            value
                .trim()
                .parse()
                .map_err(|_| format!("invalid value '{}' for {:?}", value, option))
        }

        match option {
            SetOption::Broker => self.broker = Some(value.to_string()),
            SetOption::DurationType => self.duration = Some(value.to_string()),
            SetOption::ParallelCount => self.parallel_count = number(option, value)?,
            SetOption::MessageSize => self.message_size = number(option, value)?,
            SetOption::Rate => self.rate = number(option, value)?,
            SetOption::FailConditionLatency => self.fcl_ms = Some(number(option, value)?),
            SetOption::ManagementInterface => {
                self.management_interface = Some(value.to_string())
            }
        }
        Ok(())
    }

    /// Offered load: rate times parallel connections
    pub fn load(&self) -> u64 {
        self.rate.saturating_mul(u64::from(self.parallel_count.max(1)))
    }
}

/// The load-generating side of a peer
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Run one test; `Ok` and `Err` carry the message for the outcome notification
    async fn run(&self, role: Role, settings: &WorkerSettings) -> Result<String, String>;

    /// Current throughput and latency
    fn stats(&self, role: Role, settings: &WorkerSettings) -> StatsReport;

    /// Where the peer's data server can be reached
    fn data_server(&self, info: &PeerInfo) -> String {
        format!("http://{}:{}/", info.host, DATA_SERVER_PORT)
    }

    /// Log files kept for `location`, as (file name, contents)
    fn log_files(&self, _location: LogLocation) -> Vec<(String, Vec<u8>)> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
struct RunRecord {
    successful: bool,
    summary: String,
}

/// A worker that fails once the offered load passes a breaking point
///
/// Reported latency grows linearly with load: `base × (1 + load / breaking_point)`.
pub struct SimulatedWorker {
    breaking_point: u64,
    base_latency_ms: f64,
    run_time: Duration,
    history: Mutex<Vec<RunRecord>>,
}

impl SimulatedWorker {
    pub fn new(breaking_point: u64, base_latency_ms: f64, run_time: Duration) -> Self {
        Self {
            breaking_point: breaking_point.max(1),
            base_latency_ms,
            run_time,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &LabConfig) -> Self {
        Self::new(config.breaking_point, config.base_latency_ms, config.run_time)
    }

    /// Modelled latency in milliseconds
    pub fn latency_for(&self, settings: &WorkerSettings) -> f64 {
        self.base_latency_ms * (1.0 + settings.load() as f64 / self.breaking_point as f64)
    }

    fn verdict(&self, settings: &WorkerSettings) -> Result<String, String> {
        let load = settings.load();
        if load > self.breaking_point {
            return Err(format!(
                "offered load {} exceeds the breaking point {}",
                load, self.breaking_point
            ));
        }

        let latency = self.latency_for(settings);
        if let Some(fcl) = settings.fcl_ms {
            if latency > fcl as f64 {
                return Err(format!(
                    "latency {:.2} ms exceeds the fail condition of {} ms",
                    latency, fcl
                ));
            }
        }

        Ok(format!(
            "completed {} msg/s over {} connections at {:.2} ms",
            settings.rate, settings.parallel_count, latency
        ))
    }
}

#[async_trait]
impl Worker for SimulatedWorker {
    async fn run(&self, role: Role, settings: &WorkerSettings) -> Result<String, String> {
        tokio::time::sleep(self.run_time).await;
        let outcome = self.verdict(settings);
        let (successful, summary) = match &outcome {
            Ok(message) => (true, message.clone()),
            Err(message) => (false, message.clone()),
        };
        self.history.lock().push(RunRecord {
            successful,
            summary: format!("{}: {}", role, summary),
        });
        outcome
    }

    fn stats(&self, role: Role, settings: &WorkerSettings) -> StatsReport {
        StatsReport {
            child_count: settings.parallel_count,
            role_info: role.to_string(),
            stats_type: 0,
            timestamp: Utc::now().to_rfc3339(),
            count: settings.rate.saturating_mul(self.run_time.as_secs().max(1)),
            rate: settings.rate as f64,
            latency: self.latency_for(settings),
        }
    }

    fn log_files(&self, location: LogLocation) -> Vec<(String, Vec<u8>)> {
        let history = self.history.lock();
        let record = match location {
            LogLocation::Last | LogLocation::Any => history.last(),
            LogLocation::LastSuccessful => history.iter().rev().find(|r| r.successful),
            LogLocation::LastFailed => history.iter().rev().find(|r| !r.successful),
        };
        record
            .map(|r| vec![("test.log".to_string(), r.summary.clone().into_bytes())])
            .unwrap_or_default()
    }
}

/// Split log files into chunk payloads
pub fn chunk_logs(location: LogLocation, files: &[(String, Vec<u8>)]) -> Vec<LogChunk> {
    let mut chunks = Vec::new();
    for (name, data) in files {
        let hash = format!("{:x}", Sha256::digest(data));
        let pieces: Vec<&[u8]> = if data.is_empty() {
            vec![&data[..]]
        } else {
            data.chunks(LOG_CHUNK_SIZE.min(LogChunk::MAX_CHUNK_SIZE))
                .collect()
        };
        let total = pieces.len() as u32;
        for (index, piece) in pieces.into_iter().enumerate() {
            chunks.push(LogChunk {
                location,
                file_name: name.clone(),
                index: index as u32,
                total,
                file_size: data.len() as u64,
                file_hash: hash.clone(),
                data: piece.to_vec(),
            });
        }
    }
    chunks
}

enum Flow {
    Continue,
    Halt,
}

struct PeerState {
    client: Arc<ExchangeClient>,
    topics: Topics,
    identity: Mutex<PeerIdentity>,
    settings: Mutex<WorkerSettings>,
    worker: Arc<dyn Worker>,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl PeerState {
    fn identity(&self) -> PeerIdentity {
        self.identity.lock().clone()
    }

    async fn reply(&self, request: &Note, command: Command, payload: Payload) -> Result<(), ExchangeError> {
        let level = if command == Command::Ping {
            ServiceLevel::AtMostOnce
        } else {
            ServiceLevel::AtLeastOnce
        };
        let reply = Note::response_to(request, command, self.identity(), payload);
        self.client
            .publish(&self.topics.responses(), &reply, level)
            .await
    }

    async fn ok(&self, request: &Note) -> Result<(), ExchangeError> {
        self.reply(request, Command::Ok, Payload::Empty).await
    }

    async fn internal_error(&self, request: &Note, message: String) -> Result<(), ExchangeError> {
        warn!("{}: {}", self.identity().info, message);
        self.reply(request, Command::InternalError, Payload::Message(message))
            .await
    }

    async fn switch_role(&self, role: Role) -> Result<(), ExchangeError> {
        let previous = self.identity.lock().info.role;
        if previous == role {
            return Ok(());
        }
        self.client.unsubscribe(&self.topics.role(previous)).await?;
        self.client
            .subscribe(&self.topics.role(role), ServiceLevel::AtLeastOnce)
            .await?;

        let mut identity = self.identity.lock();
        let updated = identity.info.with_role(role);
        identity.info = updated;
        info!("{} switched from {} to {}", identity.info.name, previous, role);
        Ok(())
    }

    fn stop_worker(&self) {
        if let Some(running) = self.running.lock().take() {
            running.abort();
        }
    }

    fn start_worker(self: &Arc<Self>, request: Note) {
        let state = self.clone();
        let handle = tokio::spawn(async move {
            let identity = state.identity();
            let settings = state.settings.lock().clone();
            let outcome = state.worker.run(identity.info.role, &settings).await;

            let notification = match outcome {
                Ok(message) => {
                    info!("Test successful on {}: {}", identity.info.name, message);
                    Note::notification_for(
                        &request,
                        Command::NotifySuccess,
                        identity,
                        Payload::Message(message),
                    )
                }
                Err(message) => {
                    info!("Test failed on {}: {}", identity.info.name, message);
                    Note::notification_for(
                        &request,
                        Command::NotifyFail,
                        identity,
                        Payload::Message(message),
                    )
                }
            };

            if let Err(err) = state
                .client
                .publish(
                    &state.topics.notifications(),
                    &notification,
                    ServiceLevel::ExactlyOnce,
                )
                .await
            {
                error!("Unable to publish the test outcome: {}", err);
            }
        });

        let previous = self.running.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn ship_logs(&self, request: &Note, location: LogLocation) -> Result<(), ExchangeError> {
        let files = self.worker.log_files(location);
        if files.is_empty() {
            return self
                .internal_error(request, format!("no logs available for {:?}", location))
                .await;
        }

        let identity = self.identity();
        let notes: Vec<Note> = chunk_logs(location, &files)
            .into_iter()
            .map(|chunk| {
                Note::response_to(request, Command::Log, identity.clone(), Payload::LogChunk(chunk))
            })
            .collect();
        debug!("Shipping {} log chunks", notes.len());

        self.client
            .publish_throttled(&self.topics.logs(), &notes, |sent, total| {
                if sent < total {
                    LOG_CHUNK_THROTTLE
                } else {
                    Duration::ZERO
                }
            })
            .await
    }

    async fn handle(self: &Arc<Self>, request: Note) -> Result<Flow, ExchangeError> {
        debug!("{} handling {}", self.identity().info.name, request);

        match (&request.command, &request.payload) {
            (Command::Ping, Payload::Ping { sec, usec }) => {
                let elapsed_micros = Payload::elapsed_since(*sec, *usec);
                self.reply(&request, Command::Ping, Payload::Pong { elapsed_micros })
                    .await?;
            }
            (Command::Set, Payload::Set { option, value }) => {
                let applied = self.settings.lock().apply(*option, value);
                match applied {
                    Ok(()) => self.ok(&request).await?,
                    Err(message) => self.internal_error(&request, message).await?,
                }
            }
            (Command::Get, Payload::Get(GetOption::DataServer)) => {
                let value = self.worker.data_server(&self.identity().info);
                self.reply(
                    &request,
                    Command::Get,
                    Payload::GetReply {
                        option: GetOption::DataServer,
                        value,
                    },
                )
                .await?;
            }
            (Command::Stats, _) => {
                let role = self.identity().info.role;
                let settings = self.settings.lock().clone();
                let report = self.worker.stats(role, &settings);
                self.reply(&request, Command::Stats, Payload::Stats(report))
                    .await?;
            }
            (Command::RoleAssign, Payload::Role(role)) => {
                self.switch_role(*role).await?;
                self.ok(&request).await?;
            }
            (Command::RoleUnassign, _) => {
                self.stop_worker();
                self.switch_role(Role::Other).await?;
                self.ok(&request).await?;
            }
            (Command::StartSender | Command::StartReceiver, _) => {
                let role = self.identity().info.role;
                if !role.is_worker() {
                    self.internal_error(&request, format!("a {} peer cannot run a test", role))
                        .await?;
                } else {
                    self.ok(&request).await?;
                    self.start_worker(request.clone());
                }
            }
            (Command::StopSender | Command::StopReceiver, _) => {
                self.stop_worker();
                self.ok(&request).await?;
            }
            (
                Command::StartInspector
                | Command::StopInspector
                | Command::StartAgent
                | Command::StopAgent
                | Command::Flush
                | Command::AgentSource,
                _,
            ) => self.ok(&request).await?,
            (Command::Log, Payload::LogRequest { location, .. }) => {
                self.ship_logs(&request, *location).await?;
            }
            (Command::Drain, Payload::Drain(order)) => {
                self.ok(&request).await?;
                let complete = Note::notification_for(
                    &request,
                    Command::DrainComplete,
                    self.identity(),
                    Payload::DrainComplete {
                        successful: true,
                        message: format!("drained {}", order.url),
                    },
                );
                self.client
                    .publish(
                        &self.topics.notifications(),
                        &complete,
                        ServiceLevel::ExactlyOnce,
                    )
                    .await?;
            }
            (Command::UserCommand, Payload::UserCommand { option, value }) => {
                let payload = Payload::UserCommand {
                    option: *option,
                    value: value.clone(),
                };
                self.reply(&request, Command::UserCommand, payload).await?;
            }
            (Command::Halt, _) => {
                self.ok(&request).await?;
                return Ok(Flow::Halt);
            }
            _ => {
                self.reply(&request, Command::ProtocolError, Payload::Empty)
                    .await?
            }
        }
        Ok(Flow::Continue)
    }
}

/// A running peer
pub struct PeerNode {
    id: PeerId,
    state: Arc<PeerState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PeerNode {
    /// Connect, subscribe and start answering requests
    pub async fn start(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        topics: Topics,
        info: PeerInfo,
        worker: Arc<dyn Worker>,
    ) -> Result<Self, ExchangeError> {
        let client = Arc::new(ExchangeClient::connect(transport, policy).await?);
        let identity = PeerIdentity::new(PeerId::generate(), info);

        client
            .subscribe(&topics.all_peers(), ServiceLevel::AtLeastOnce)
            .await?;
        client
            .subscribe(&topics.role(identity.info.role), ServiceLevel::AtLeastOnce)
            .await?;
        client
            .subscribe(&topics.peer(&identity.id), ServiceLevel::AtLeastOnce)
            .await?;

        let id = identity.id.clone();
        info!("Peer {} ({}) is ready", identity.info, id);

        let state = Arc::new(PeerState {
            client,
            topics,
            identity: Mutex::new(identity),
            settings: Mutex::new(WorkerSettings::default()),
            worker,
            running: Mutex::new(None),
        });
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(state.clone(), shutdown.clone()));

        Ok(Self {
            id,
            state,
            shutdown,
            task,
        })
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Current identity, including the role most recently assigned
    pub fn identity(&self) -> PeerIdentity {
        self.state.identity()
    }

    /// Whether the peer stopped serving, after a `Halt` for instance
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop serving and close the session
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }

    /// Drop off the exchange the way a crashed peer would, leaving only the
    /// abnormal-disconnect notice behind
    pub async fn kill(self) {
        let notice = Note::unsolicited(
            Command::AbnormalDisconnect,
            self.state.identity(),
            Payload::Message("connection lost".to_string()),
        );
        if let Err(err) = self
            .state
            .client
            .publish(
                &self.state.topics.notifications(),
                &notice,
                ServiceLevel::ExactlyOnce,
            )
            .await
        {
            warn!("Unable to publish the disconnect notice: {}", err);
        }
        self.shutdown().await;
    }
}

async fn serve(state: Arc<PeerState>, shutdown: CancellationToken) {
    loop {
        let note = tokio::select! {
            _ = shutdown.cancelled() => break,
            note = state.client.collector().next() => note,
        };
        if !note.is_request() {
            continue;
        }

        match state.handle(note).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Halt) => {
                info!("{} halted", state.identity().info.name);
                break;
            }
            Err(err) => warn!("{} failed to answer: {}", state.identity().info.name, err),
        }
    }

    state.stop_worker();
    if let Err(err) = state.client.disconnect().await {
        debug!("Disconnect after shutdown failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use conductor_protocol::CorrelationId;

    fn settings(rate: u64, parallel_count: u32) -> WorkerSettings {
        WorkerSettings {
            rate,
            parallel_count,
            ..WorkerSettings::default()
        }
    }

    #[test]
    fn test_settings_apply() {
        let mut settings = WorkerSettings::default();
        settings.apply(SetOption::Rate, "150").unwrap();
        settings.apply(SetOption::ParallelCount, "2").unwrap();
        settings.apply(SetOption::FailConditionLatency, "600").unwrap();
        settings
            .apply(SetOption::Broker, "amqp://sut:5672/queue")
            .unwrap();

        assert_eq!(settings.load(), 300);
        assert_eq!(settings.fcl_ms, Some(600));
        assert_eq!(settings.broker.as_deref(), Some("amqp://sut:5672/queue"));
        assert!(settings.apply(SetOption::Rate, "fast").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_worker_breaking_point() {
        let worker = SimulatedWorker::new(300, 5.0, Duration::from_millis(10));

        assert!(worker.run(Role::Sender, &settings(150, 2)).await.is_ok());
        let err = worker
            .run(Role::Sender, &settings(200, 2))
            .await
            .unwrap_err();
        assert!(err.contains("breaking point"));

        assert_eq!(worker.log_files(LogLocation::Last).len(), 1);
        let (_, failed) = &worker.log_files(LogLocation::LastFailed)[0];
        assert!(String::from_utf8_lossy(failed).contains("breaking point"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_worker_latency_condition() {
        let worker = SimulatedWorker::new(1_000, 100.0, Duration::from_millis(10));
        let mut tight = settings(900, 1);
        tight.fcl_ms = Some(150);

        let err = worker.run(Role::Receiver, &tight).await.unwrap_err();
        assert!(err.contains("fail condition"));
        assert!(worker.stats(Role::Receiver, &tight).latency > 150.0);
    }

    #[test]
    fn test_chunk_logs_splits_large_files() {
        let files = vec![("big.log".to_string(), vec![7u8; LOG_CHUNK_SIZE * 2 + 1])];
        let chunks = chunk_logs(LogLocation::Any, &files);

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.total == 3));
        assert!(chunks[2].is_last());
        assert_eq!(chunks[2].data.len(), 1);
        assert_eq!(chunks[0].file_hash, chunks[2].file_hash);
        assert_eq!(chunks[0].file_size, (LOG_CHUNK_SIZE * 2 + 1) as u64);
    }

    struct Harness {
        broker: MemoryBroker,
        topics: Topics,
        controller: ExchangeClient,
        origin: PeerIdentity,
    }

    impl Harness {
        async fn new() -> Self {
            let broker = MemoryBroker::new();
            let topics = Topics::default();
            let controller = ExchangeClient::connect(
                Arc::new(broker.transport()),
                ReconnectPolicy::fixed(1, Duration::from_millis(1)),
            )
            .await
            .unwrap();
            controller
                .subscribe(&topics.responses(), ServiceLevel::AtLeastOnce)
                .await
                .unwrap();
            controller
                .subscribe(&topics.notifications(), ServiceLevel::ExactlyOnce)
                .await
                .unwrap();
            controller
                .subscribe(&topics.logs(), ServiceLevel::ExactlyOnce)
                .await
                .unwrap();
            let origin = PeerIdentity::new(
                PeerId::generate(),
                PeerInfo::new("controller", "localhost", Role::Other),
            );
            Self {
                broker,
                topics,
                controller,
                origin,
            }
        }

        async fn peer(&self, name: &str, role: Role, worker: Arc<dyn Worker>) -> PeerNode {
            PeerNode::start(
                Arc::new(self.broker.transport()),
                ReconnectPolicy::fixed(1, Duration::from_millis(1)),
                self.topics.clone(),
                PeerInfo::new(name, "node-a", role),
                worker,
            )
            .await
            .unwrap()
        }

        async fn send(&self, topic: &str, command: Command, payload: Payload) -> CorrelationId {
            let note = Note::request(command, self.origin.clone(), payload);
            self.controller
                .publish(topic, &note, ServiceLevel::AtLeastOnce)
                .await
                .unwrap();
            note.correlation_id
        }

        async fn replies(&self, id: &CorrelationId, expected: usize) -> Vec<Note> {
            self.controller
                .collector()
                .wait_for_correlated(id, expected, Duration::from_secs(2))
                .await
                .unwrap()
        }
    }

    fn quick_worker() -> Arc<dyn Worker> {
        Arc::new(SimulatedWorker::new(1_000, 5.0, Duration::from_millis(20)))
    }

    #[tokio::test]
    async fn test_peer_answers_ping_and_get() {
        let harness = Harness::new().await;
        let peer = harness.peer("sender-1", Role::Sender, quick_worker()).await;

        let ping = harness
            .send(&harness.topics.all_peers(), Command::Ping, Payload::ping_now())
            .await;
        let pong = harness.replies(&ping, 1).await;
        assert_eq!(pong[0].command, Command::Ping);
        assert_eq!(&pong[0].origin.id, peer.id());

        let get = harness
            .send(
                &harness.topics.peer(peer.id()),
                Command::Get,
                Payload::Get(GetOption::DataServer),
            )
            .await;
        let reply = harness.replies(&get, 1).await;
        assert_eq!(
            reply[0].payload,
            Payload::GetReply {
                option: GetOption::DataServer,
                value: "http://node-a:8000/".to_string()
            }
        );
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_peer_switches_role_topics() {
        let harness = Harness::new().await;
        let peer = harness.peer("worker-1", Role::Other, quick_worker()).await;
        assert_eq!(harness.broker.subscriber_count(&harness.topics.role(Role::Other)), 1);

        let assign = harness
            .send(
                &harness.topics.peer(peer.id()),
                Command::RoleAssign,
                Payload::Role(Role::Receiver),
            )
            .await;
        assert_eq!(harness.replies(&assign, 1).await[0].command, Command::Ok);
        assert_eq!(peer.identity().info.role, Role::Receiver);
        assert_eq!(harness.broker.subscriber_count(&harness.topics.role(Role::Receiver)), 1);
        assert_eq!(harness.broker.subscriber_count(&harness.topics.role(Role::Other)), 0);

        let unassign = harness
            .send(&harness.topics.peer(peer.id()), Command::RoleUnassign, Payload::Empty)
            .await;
        assert_eq!(harness.replies(&unassign, 1).await[0].command, Command::Ok);
        assert_eq!(peer.identity().info.role, Role::Other);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_yields_one_correlated_outcome() {
        let harness = Harness::new().await;
        let peer = harness.peer("sender-1", Role::Sender, quick_worker()).await;
        let topic = harness.topics.role(Role::Sender);

        let set = harness
            .send(
                &topic,
                Command::Set,
                Payload::Set {
                    option: SetOption::Rate,
                    value: "100".to_string(),
                },
            )
            .await;
        assert_eq!(harness.replies(&set, 1).await[0].command, Command::Ok);

        let start = harness.send(&topic, Command::StartSender, Payload::Empty).await;
        let replies = harness.replies(&start, 2).await;
        assert_eq!(replies[0].command, Command::Ok);
        assert_eq!(replies[1].command, Command::NotifySuccess);
        assert!(replies[1].is_notification());

        let records = harness.broker.published_to(&harness.topics.notifications());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, ServiceLevel::ExactlyOnce);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_unassigned_peer_refuses_to_start() {
        let harness = Harness::new().await;
        let peer = harness.peer("worker-1", Role::Other, quick_worker()).await;

        let start = harness
            .send(&harness.topics.peer(peer.id()), Command::StartSender, Payload::Empty)
            .await;
        let replies = harness.replies(&start, 1).await;
        assert_eq!(replies[0].command, Command::InternalError);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_log_request_ships_chunks() {
        let harness = Harness::new().await;
        let peer = harness.peer("receiver-1", Role::Receiver, quick_worker()).await;
        let topic = harness.topics.peer(peer.id());

        let empty = harness
            .send(
                &topic,
                Command::Log,
                Payload::LogRequest {
                    location: LogLocation::Last,
                    type_name: "receiver".to_string(),
                },
            )
            .await;
        assert_eq!(harness.replies(&empty, 1).await[0].command, Command::InternalError);

        let start = harness.send(&topic, Command::StartReceiver, Payload::Empty).await;
        harness.replies(&start, 2).await;

        let logs = harness
            .send(
                &topic,
                Command::Log,
                Payload::LogRequest {
                    location: LogLocation::LastSuccessful,
                    type_name: "receiver".to_string(),
                },
            )
            .await;
        let chunks = harness.replies(&logs, 1).await;
        match &chunks[0].payload {
            Payload::LogChunk(chunk) => {
                assert_eq!(chunk.file_name, "test.log");
                assert!(chunk.is_last());
            }
            other => panic!("unexpected payload {other:?}"),
        }
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_setting_is_refused() {
        let harness = Harness::new().await;
        let peer = harness.peer("sender-1", Role::Sender, quick_worker()).await;

        let set = harness
            .send(
                &harness.topics.peer(peer.id()),
                Command::Set,
                Payload::Set {
                    option: SetOption::MessageSize,
                    value: "huge".to_string(),
                },
            )
            .await;
        assert_eq!(harness.replies(&set, 1).await[0].command, Command::InternalError);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_halt_stops_the_peer() {
        let harness = Harness::new().await;
        let peer = harness.peer("sender-1", Role::Sender, quick_worker()).await;

        let halt = harness
            .send(&harness.topics.all_peers(), Command::Halt, Payload::Empty)
            .await;
        assert_eq!(harness.replies(&halt, 1).await[0].command, Command::Ok);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !peer.is_stopped() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_drain_reports_completion() {
        let harness = Harness::new().await;
        let peer = harness.peer("receiver-1", Role::Receiver, quick_worker()).await;

        let drain = harness
            .send(
                &harness.topics.peer(peer.id()),
                Command::Drain,
                Payload::Drain(conductor_protocol::DrainOrder {
                    duration: "10s".to_string(),
                    url: "amqp://sut/queue".to_string(),
                    parallel_count: 1,
                    worker_name: "receiver".to_string(),
                }),
            )
            .await;
        let replies = harness.replies(&drain, 2).await;
        assert_eq!(replies[0].command, Command::Ok);
        assert!(matches!(
            replies[1].payload,
            Payload::DrainComplete {
                successful: true,
                ..
            }
        ));
        peer.shutdown().await;
    }
}
