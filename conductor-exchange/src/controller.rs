//! Controller-side request facade
//!
//! [`Controller`] is what the execution engine talks to: one method per
//! command, each publishing a request on the right topic with the right
//! service level. Requests return their correlation id; replies are picked up
//! from the collector with correlation-filtered collection.

use conductor_config::ExchangeConfig;
use conductor_protocol::{
    Command, CorrelationId, DrainOrder, GetOption, LogLocation, Note, Payload, PeerId,
    PeerIdentity, PeerInfo, Role, SetOption, Topics,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::ExchangeClient;
use crate::collector::Collector;
use crate::error::{ExchangeError, NotEnoughReplies};
use crate::reconnect::ReconnectPolicy;
use crate::registry::PeerSet;
use crate::transport::{ServiceLevel, Transport};

const CONTROLLER_HOST: &str = "localhost";

/// Reply collection timings
#[derive(Debug, Clone, Copy)]
pub struct ReplyTimings {
    /// Upper bound for a synchronous request
    pub reply_timeout: Duration,

    /// Wait between empty polls
    pub collect_wait: Duration,

    /// Empty polls before a collection gives up
    pub collect_retries: u32,
}

impl ReplyTimings {
    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self {
            reply_timeout: config.reply_timeout,
            collect_wait: config.collect_wait,
            collect_retries: config.collect_retries,
        }
    }
}

/// A data server advertised by a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataServer {
    pub peer: PeerId,
    pub name: String,
    pub url: String,
}

/// Controller end of the exchange
pub struct Controller {
    client: ExchangeClient,
    topics: Topics,
    identity: PeerIdentity,
    timings: ReplyTimings,
}

impl Controller {
    /// Connect and subscribe to the topics peers answer on
    pub async fn connect(
        transport: Arc<dyn Transport>,
        config: &ExchangeConfig,
    ) -> Result<Self, ExchangeError> {
        let policy = ReconnectPolicy::from_config(&config.reconnect);
        let client = ExchangeClient::connect(transport, policy).await?;
        let topics = Topics::new(config.topic_root.as_str());

        client
            .subscribe(&topics.responses(), ServiceLevel::AtLeastOnce)
            .await?;
        client
            .subscribe(&topics.notifications(), ServiceLevel::ExactlyOnce)
            .await?;
        client
            .subscribe(&topics.logs(), ServiceLevel::ExactlyOnce)
            .await?;

        let identity = PeerIdentity::new(
            PeerId::generate(),
            PeerInfo::new(config.client_name.as_str(), CONTROLLER_HOST, Role::Other),
        );
        info!("Controller {} connected to {}", identity.info, config.url);

        Ok(Self {
            client,
            topics,
            identity,
            timings: ReplyTimings::from_config(config),
        })
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn timings(&self) -> ReplyTimings {
        self.timings
    }

    pub fn collector(&self) -> &Arc<Collector> {
        self.client.collector()
    }

    /// Peers seen on the wire so far, without a new ping round
    pub fn known_peers(&self) -> PeerSet {
        self.client.registry().snapshot()
    }

    /// Publish a request and return its correlation id
    pub async fn send(
        &self,
        topic: &str,
        command: Command,
        payload: Payload,
        level: ServiceLevel,
    ) -> Result<CorrelationId, ExchangeError> {
        let note = Note::request(command, self.identity.clone(), payload);
        self.client.publish(topic, &note, level).await?;
        Ok(note.correlation_id)
    }

    /// Publish a request and wait for `expected` replies to it
    pub async fn request(
        &self,
        topic: &str,
        command: Command,
        payload: Payload,
        expected: usize,
    ) -> Result<Vec<Note>, ExchangeError> {
        let id = self
            .send(topic, command, payload, ServiceLevel::AtLeastOnce)
            .await?;
        let replies = self
            .collector()
            .wait_for_correlated(&id, expected, self.timings.reply_timeout)
            .await?;
        Ok(replies)
    }

    /// Wait for at least one response to `id` and fail if any response is an error
    ///
    /// Notifications correlated to the same request, such as the outcome of a
    /// Start, are left in the collector.
    pub async fn confirm(&self, id: &CorrelationId) -> Result<(), ExchangeError> {
        let replies = self
            .collector()
            .wait_for_matching(
                |note| note.is_response() && note.answers(id),
                1,
                self.timings.reply_timeout,
            )
            .await?;
        acknowledged(&replies)
    }

    /// Drain whatever replies to `id` have arrived, without waiting
    pub fn replies_to(&self, id: &CorrelationId) -> Vec<Note> {
        self.collector().collect_matching(|note| note.answers(id))
    }

    pub async fn ping(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.send(topic, Command::Ping, Payload::ping_now(), ServiceLevel::AtMostOnce)
            .await
    }

    /// Ping every peer and build a fresh snapshot from whoever answers
    ///
    /// Collection stops once the configured number of consecutive polls
    /// brings no new reply. Peers that stopped answering are not included.
    pub async fn peers(&self) -> Result<PeerSet, ExchangeError> {
        let id = self.ping(&self.topics.all_peers()).await?;
        let replies = self
            .collector()
            .collect_until_stale(
                |note| note.answers(&id) && note.command == Command::Ping,
                self.timings.collect_wait,
                self.timings.collect_retries,
            )
            .await;

        for reply in &replies {
            if let Payload::Pong { elapsed_micros } = reply.payload {
                debug!(
                    "Elapsed time from {}: {} µs",
                    reply.origin.info, elapsed_micros
                );
            }
        }

        let peers: PeerSet = replies
            .into_iter()
            .map(|note| (note.origin.id, note.origin.info))
            .collect();
        debug!("Ping round found {}", peers);
        Ok(peers)
    }

    pub async fn set(
        &self,
        topic: &str,
        option: SetOption,
        value: impl Into<String>,
    ) -> Result<CorrelationId, ExchangeError> {
        let value = value.into();
        debug!("Setting {:?} to {} on {}", option, value, topic);
        self.send(
            topic,
            Command::Set,
            Payload::Set { option, value },
            ServiceLevel::AtLeastOnce,
        )
        .await
    }

    pub async fn set_broker(&self, topic: &str, url: &str) -> Result<CorrelationId, ExchangeError> {
        self.set(topic, SetOption::Broker, url).await
    }

    /// Test duration as the worker understands it, a number of seconds or a message count
    pub async fn set_duration(
        &self,
        topic: &str,
        duration: &str,
    ) -> Result<CorrelationId, ExchangeError> {
        self.set(topic, SetOption::DurationType, duration).await
    }

    pub async fn set_rate(&self, topic: &str, rate: u64) -> Result<CorrelationId, ExchangeError> {
        self.set(topic, SetOption::Rate, rate.to_string()).await
    }

    pub async fn set_parallel_count(
        &self,
        topic: &str,
        parallel_count: u32,
    ) -> Result<CorrelationId, ExchangeError> {
        self.set(topic, SetOption::ParallelCount, parallel_count.to_string())
            .await
    }

    pub async fn set_message_size(
        &self,
        topic: &str,
        message_size: u32,
    ) -> Result<CorrelationId, ExchangeError> {
        self.set(topic, SetOption::MessageSize, message_size.to_string())
            .await
    }

    /// Fail condition on latency, in milliseconds
    pub async fn set_fcl(&self, topic: &str, fcl_ms: u64) -> Result<CorrelationId, ExchangeError> {
        self.set(topic, SetOption::FailConditionLatency, fcl_ms.to_string())
            .await
    }

    pub async fn set_management_interface(
        &self,
        topic: &str,
        url: &str,
    ) -> Result<CorrelationId, ExchangeError> {
        self.set(topic, SetOption::ManagementInterface, url).await
    }

    async fn command(&self, topic: &str, command: Command) -> Result<CorrelationId, ExchangeError> {
        self.send(topic, command, Payload::Empty, ServiceLevel::AtLeastOnce)
            .await
    }

    pub async fn start_sender(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::StartSender).await
    }

    pub async fn stop_sender(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::StopSender).await
    }

    pub async fn start_receiver(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::StartReceiver).await
    }

    pub async fn stop_receiver(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::StopReceiver).await
    }

    pub async fn start_inspector(
        &self,
        topic: &str,
        name: &str,
    ) -> Result<CorrelationId, ExchangeError> {
        self.send(
            topic,
            Command::StartInspector,
            Payload::Message(name.to_string()),
            ServiceLevel::AtLeastOnce,
        )
        .await
    }

    pub async fn stop_inspector(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::StopInspector).await
    }

    pub async fn start_agent(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::StartAgent).await
    }

    pub async fn stop_agent(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::StopAgent).await
    }

    pub async fn flush(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::Flush).await
    }

    pub async fn halt(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.command(topic, Command::Halt).await
    }

    pub async fn stats_request(&self, topic: &str) -> Result<CorrelationId, ExchangeError> {
        self.send(topic, Command::Stats, Payload::Empty, ServiceLevel::AtMostOnce)
            .await
    }

    /// Ask every peer where its data server lives
    pub async fn data_servers(&self) -> Result<Vec<DataServer>, ExchangeError> {
        let id = self
            .send(
                &self.topics.all_peers(),
                Command::Get,
                Payload::Get(GetOption::DataServer),
                ServiceLevel::AtLeastOnce,
            )
            .await?;

        let replies = self
            .collector()
            .collect_until_stale(
                |note| note.answers(&id),
                self.timings.collect_wait,
                self.timings.collect_retries,
            )
            .await;

        let servers: Vec<DataServer> = replies
            .into_iter()
            .filter_map(|note| match note.payload {
                Payload::GetReply {
                    option: GetOption::DataServer,
                    value,
                } => Some(DataServer {
                    peer: note.origin.id,
                    name: note.origin.info.name,
                    url: value,
                }),
                _ => None,
            })
            .collect();

        for server in &servers {
            info!("Registering data server at {} for {}", server.url, server.name);
        }
        Ok(servers)
    }

    /// Give a peer a role and wait for it to acknowledge
    pub async fn role_assign(&self, peer: &PeerId, role: Role) -> Result<(), ExchangeError> {
        let id = self
            .send(
                &self.topics.peer(peer),
                Command::RoleAssign,
                Payload::Role(role),
                ServiceLevel::AtLeastOnce,
            )
            .await?;
        self.confirm(&id).await
    }

    /// Take a peer's role away and wait for it to acknowledge
    pub async fn role_unassign(&self, peer: &PeerId) -> Result<(), ExchangeError> {
        let id = self
            .send(
                &self.topics.peer(peer),
                Command::RoleUnassign,
                Payload::Empty,
                ServiceLevel::AtLeastOnce,
            )
            .await?;
        self.confirm(&id).await
    }

    pub async fn user_command(
        &self,
        topic: &str,
        option: i64,
        value: &str,
    ) -> Result<CorrelationId, ExchangeError> {
        self.send(
            topic,
            Command::UserCommand,
            Payload::UserCommand {
                option,
                value: value.to_string(),
            },
            ServiceLevel::AtLeastOnce,
        )
        .await
    }

    pub async fn agent_source(
        &self,
        topic: &str,
        url: &str,
        branch: &str,
    ) -> Result<CorrelationId, ExchangeError> {
        self.send(
            topic,
            Command::AgentSource,
            Payload::AgentSource {
                url: url.to_string(),
                branch: branch.to_string(),
            },
            ServiceLevel::AtLeastOnce,
        )
        .await
    }

    /// Ask peers to ship a log bundle; chunks arrive on the logs topic
    pub async fn log_request(
        &self,
        topic: &str,
        location: LogLocation,
        type_name: &str,
    ) -> Result<CorrelationId, ExchangeError> {
        self.send(
            topic,
            Command::Log,
            Payload::LogRequest {
                location,
                type_name: type_name.to_string(),
            },
            ServiceLevel::AtLeastOnce,
        )
        .await
    }

    pub async fn drain_request(
        &self,
        topic: &str,
        order: DrainOrder,
    ) -> Result<CorrelationId, ExchangeError> {
        self.send(topic, Command::Drain, Payload::Drain(order), ServiceLevel::AtLeastOnce)
            .await
    }

    /// Wait until `expected` success or failure notifications arrived
    pub async fn wait_for_notifications(
        &self,
        expected: usize,
        limit: Duration,
    ) -> Result<Vec<Note>, NotEnoughReplies> {
        self.collector()
            .wait_for_matching(Note::is_test_outcome, expected, limit)
            .await
    }

    /// Wait for `expected` outcomes of the given Start requests
    ///
    /// Outcomes correlated to any other request stay in the collector.
    pub async fn wait_for_outcomes(
        &self,
        starts: &[CorrelationId],
        expected: usize,
        limit: Duration,
    ) -> Result<Vec<Note>, NotEnoughReplies> {
        self.collector()
            .wait_for_matching(
                |note| note.is_test_outcome() && starts.iter().any(|id| note.answers(id)),
                expected,
                limit,
            )
            .await
    }

    pub async fn disconnect(&self) -> Result<(), ExchangeError> {
        self.client.disconnect().await
    }
}

/// Turn error replies into [`ExchangeError::Rejected`]
fn acknowledged(replies: &[Note]) -> Result<(), ExchangeError> {
    for reply in replies {
        match reply.command {
            Command::InternalError => {
                let reason = reply.payload.message().unwrap_or("internal error");
                warn!("{} rejected the request: {}", reply.origin.info, reason);
                return Err(ExchangeError::Rejected(format!(
                    "{}: {}",
                    reply.origin.info.name, reason
                )));
            }
            Command::ProtocolError => {
                return Err(ExchangeError::Rejected(format!(
                    "{}: protocol error",
                    reply.origin.info.name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
