//! Incremental test executor
//!
//! Runs one test cycle per step of the load ramp. Each cycle distributes
//! roles, applies the [`TestProfile`], starts the workers, waits for their
//! verdicts and stops them again. A failed cycle does not stop the ramp; the
//! verdict of the cycle run at both ceilings decides the overall result.

use conductor_config::ExecutionConfig;
use conductor_exchange::{Controller, DataServer, ExchangeError};
use conductor_protocol::{Command, CorrelationId, Note, Role};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::distribution::{DistributionStrategy, PeerEndpoint};
use crate::downloader::ReportsDownloader;
use crate::error::ExecutionError;
use crate::processor::TestProcessor;
use crate::profile::TestProfile;

/// Name handed to inspectors when they are started
pub const INSPECTOR_NAME: &str = "default";

/// Where the executor is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Distributing,
    Running,
    AwaitingQuorum,
    Evaluating,
    CoolingDown,
    Done,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Distributing => "distributing",
            ExecutorState::Running => "running",
            ExecutorState::AwaitingQuorum => "awaiting-quorum",
            ExecutorState::Evaluating => "evaluating",
            ExecutorState::CoolingDown => "cooling-down",
            ExecutorState::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u32,
    pub rate: u32,
    pub parallel_count: u32,
    pub successful: bool,
    pub reasons: Vec<String>,
}

/// Drives the load ramp to its ceilings
pub struct IncrementalTestExecutor {
    controller: Arc<Controller>,
    strategy: Box<dyn DistributionStrategy>,
    downloader: Arc<dyn ReportsDownloader>,
    initial: TestProfile,
    profile: TestProfile,
    cool_down_period: Duration,
    poll_interval: Duration,
    inflight_delay: Duration,
    cancel: CancellationToken,
    state: ExecutorState,
    history: Vec<CycleReport>,
}

impl IncrementalTestExecutor {
    pub fn new(
        controller: Arc<Controller>,
        strategy: Box<dyn DistributionStrategy>,
        downloader: Arc<dyn ReportsDownloader>,
        profile: TestProfile,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            controller,
            strategy,
            downloader,
            initial: profile.clone(),
            profile,
            cool_down_period: config.cool_down_period,
            poll_interval: config.poll_interval,
            inflight_delay: config.inflight_delay,
            cancel: CancellationToken::new(),
            state: ExecutorState::Idle,
            history: Vec::new(),
        }
    }

    /// Abort the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cool_down_period(&self) -> Duration {
        self.cool_down_period
    }

    pub fn set_cool_down_period(&mut self, period: Duration) {
        self.cool_down_period = period;
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn profile(&self) -> &TestProfile {
        &self.profile
    }

    /// Cycles of the last run, in order
    pub fn history(&self) -> &[CycleReport] {
        &self.history
    }

    /// Run the whole ramp and report whether the final cycle passed
    ///
    /// Roles handed out during the run are always taken back before
    /// returning, including after an error or cancellation.
    pub async fn run(&mut self) -> bool {
        self.history.clear();
        self.profile = self.initial.clone();
        self.transition(ExecutorState::Idle);

        let result = self.run_cycles().await;
        self.strategy.reset().await;
        self.transition(ExecutorState::Done);

        match result {
            Ok(true) => {
                info!(
                    "Test completed successfully after {} cycles",
                    self.history.len()
                );
                true
            }
            Ok(false) => {
                warn!("Test failed at {}", self.profile);
                false
            }
            Err(err) => {
                error!("Test execution aborted: {}", err);
                false
            }
        }
    }

    async fn run_cycles(&mut self) -> Result<bool, ExecutionError> {
        loop {
            let report = match self.run_cycle().await {
                Ok(report) => report,
                Err(err) if err.is_cycle_failure() => {
                    warn!("Test #{} failed: {}", self.profile.test_execution_number, err);
                    self.report(false, vec![err.to_string()])
                }
                Err(err) => return Err(err),
            };
            let successful = report.successful;
            self.history.push(report);

            if self.profile.is_completed() {
                return Ok(successful);
            }

            self.profile.increment();
            self.transition(ExecutorState::CoolingDown);
            info!(
                "Waiting {:?} before the next cycle",
                self.cool_down_period
            );
            interruptible(&self.cancel, sleep(self.cool_down_period)).await?;
        }
    }

    async fn run_cycle(&mut self) -> Result<CycleReport, ExecutionError> {
        let cycle = self.profile.test_execution_number;
        info!("Starting {}", self.profile);

        let dropped = self.controller.collector().clear();
        if dropped > 0 {
            debug!("Dropped {} notes left over from the previous cycle", dropped);
        }

        self.transition(ExecutorState::Distributing);
        let peers = interruptible(&self.cancel, self.controller.peers()).await??;
        let peers = interruptible(&self.cancel, self.strategy.distribute(peers)).await??;
        let servers = interruptible(&self.cancel, self.controller.data_servers()).await??;
        let endpoints = self.strategy.endpoints().to_vec();

        self.transition(ExecutorState::Running);
        let mut processor = TestProcessor::new(&self.profile, &peers);
        let outcome = self.drive(&endpoints, &mut processor).await;
        self.stop_services(&endpoints).await;

        match outcome {
            Ok(()) => {}
            Err(err) if err.is_cycle_failure() => {
                warn!("Test #{} failed: {}", cycle, err);
                processor.mark_failed(err.to_string());
            }
            Err(err) => return Err(err),
        }

        self.transition(ExecutorState::Evaluating);
        let successful = processor.is_successful();
        if successful {
            info!("Test #{} passed", cycle);
        } else {
            warn!(
                "Test #{} failed: {}",
                cycle,
                processor.reasons().join("; ")
            );
        }

        self.download(cycle, successful, &servers).await;
        Ok(self.report(successful, processor.reasons().to_vec()))
    }

    async fn drive(
        &mut self,
        endpoints: &[PeerEndpoint],
        processor: &mut TestProcessor,
    ) -> Result<(), ExecutionError> {
        interruptible(&self.cancel, self.profile.apply(&self.controller, endpoints)).await??;
        let starts = interruptible(&self.cancel, self.start_services(endpoints)).await??;
        processor.expect_outcomes_of(starts);
        self.await_quorum(endpoints, processor).await
    }

    /// Receivers first so nothing a sender publishes goes unconsumed
    ///
    /// Returns the correlation ids of the worker Start requests; the workers'
    /// outcomes answer them.
    async fn start_services(
        &self,
        endpoints: &[PeerEndpoint],
    ) -> Result<Vec<CorrelationId>, ExchangeError> {
        let mut starts = Vec::new();
        for endpoint in with_role(endpoints, Role::Receiver) {
            info!("Starting {}", endpoint);
            let id = self.controller.start_receiver(&endpoint.topic).await?;
            self.controller.confirm(&id).await?;
            starts.push(id);
        }

        for endpoint in with_role(endpoints, Role::Sender) {
            info!("Starting {}", endpoint);
            let id = self.controller.start_sender(&endpoint.topic).await?;
            self.controller.confirm(&id).await?;
            starts.push(id);
        }

        if self.profile.management_interface.is_some() {
            for endpoint in with_role(endpoints, Role::Inspector) {
                info!("Starting {}", endpoint);
                let id = self
                    .controller
                    .start_inspector(&endpoint.topic, INSPECTOR_NAME)
                    .await?;
                self.controller.confirm(&id).await?;
            }
        }

        Ok(starts)
    }

    /// Poll for worker verdicts, asking for statistics between rounds
    ///
    /// The cycle gets twice its duration in seconds worth of rounds before
    /// the missing verdicts count as a failure.
    async fn await_quorum(
        &mut self,
        endpoints: &[PeerEndpoint],
        processor: &mut TestProcessor,
    ) -> Result<(), ExecutionError> {
        self.transition(ExecutorState::AwaitingQuorum);

        let starts = processor.starts().to_vec();
        let repeat = self.profile.duration_secs() * 2;
        for round in 1..=repeat {
            let outcomes = match interruptible(
                &self.cancel,
                self.controller
                    .wait_for_outcomes(&starts, processor.pending(), self.poll_interval),
            )
            .await?
            {
                Ok(notes) => notes,
                Err(partial) => partial.replies,
            };
            processor.process(&outcomes);
            processor.process(&self.controller.collector().collect_matching(carries_verdict));

            if processor.is_settled() {
                debug!(
                    "All {} workers reported after {} rounds",
                    processor.quorum(),
                    round
                );
                return Ok(());
            }

            debug!(
                "Round {}/{}: {} of {} workers reported",
                round,
                repeat,
                processor.outcomes(),
                processor.quorum()
            );
            for endpoint in endpoints.iter().filter(|e| e.role.is_worker()) {
                self.controller.stats_request(&endpoint.topic).await?;
            }
        }

        Err(ExchangeError::NotEnoughReplies {
            expected: processor.quorum(),
            collected: processor.outcomes(),
        }
        .into())
    }

    /// Senders, then the in-flight delay, then receivers and inspectors
    async fn stop_services(&self, endpoints: &[PeerEndpoint]) {
        for endpoint in with_role(endpoints, Role::Sender) {
            self.stop(endpoint).await;
        }

        sleep(self.inflight_delay).await;

        for endpoint in with_role(endpoints, Role::Receiver) {
            self.stop(endpoint).await;
        }

        if self.profile.management_interface.is_some() {
            for endpoint in with_role(endpoints, Role::Inspector) {
                self.stop(endpoint).await;
            }
        }
    }

    async fn stop(&self, endpoint: &PeerEndpoint) {
        debug!("Stopping {}", endpoint);
        let topic = endpoint.topic.as_str();
        let sent = match endpoint.role {
            Role::Sender => self.controller.stop_sender(topic).await,
            Role::Receiver => self.controller.stop_receiver(topic).await,
            _ => self.controller.stop_inspector(topic).await,
        };

        let confirmed = match sent {
            Ok(id) => self.controller.confirm(&id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = confirmed {
            warn!("Unable to stop {}: {}", endpoint, err);
        }
    }

    async fn download(&self, cycle: u32, successful: bool, servers: &[DataServer]) {
        if servers.is_empty() {
            debug!("No data servers registered, skipping report download");
            return;
        }
        self.downloader.download(cycle, successful, servers).await;
    }

    fn report(&self, successful: bool, reasons: Vec<String>) -> CycleReport {
        CycleReport {
            cycle: self.profile.test_execution_number,
            rate: self.profile.rate,
            parallel_count: self.profile.parallel_count,
            successful,
            reasons,
        }
    }

    fn transition(&mut self, next: ExecutorState) {
        if self.state != next {
            debug!("Executor {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

fn with_role(endpoints: &[PeerEndpoint], role: Role) -> impl Iterator<Item = &PeerEndpoint> {
    endpoints.iter().filter(move |endpoint| endpoint.role == role)
}

/// Notes besides the outcomes that bear on the verdict
fn carries_verdict(note: &Note) -> bool {
    (note.is_response() && matches!(note.command, Command::Stats | Command::InternalError))
        || (note.is_notification() && note.command == Command::AbnormalDisconnect)
}

/// Run `future` unless `cancel` fires first
async fn interruptible<F>(cancel: &CancellationToken, future: F) -> Result<F::Output, ExecutionError>
where
    F: Future,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(ExecutionError::Interrupted),
        output = future => Ok(output),
    }
}
