//! Load profile of an incremental test

use conductor_config::TestConfig;
use conductor_exchange::{Controller, ExchangeError};
use conductor_protocol::Role;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::distribution::PeerEndpoint;

/// Current load of the ramp plus the bounds it escalates within
#[derive(Debug, Clone, PartialEq)]
pub struct TestProfile {
    pub broker_url: String,
    pub rate: u32,
    pub parallel_count: u32,
    pub message_size: u32,
    pub duration: Duration,
    pub fcl_ms: u64,
    pub management_interface: Option<String>,

    pub initial_rate: u32,
    pub ceiling_rate: u32,
    pub rate_increment: u32,
    pub initial_parallel: u32,
    pub ceiling_parallel: u32,
    pub parallel_increment: u32,

    /// One-based number of the cycle this profile describes
    pub test_execution_number: u32,
}

impl TestProfile {
    pub fn from_config(config: &TestConfig) -> Self {
        Self {
            broker_url: config.broker_url.clone(),
            rate: config.initial_rate,
            parallel_count: config.initial_parallel,
            message_size: config.message_size,
            duration: config.duration,
            fcl_ms: config.fcl_ms,
            management_interface: config.management_interface.clone(),
            initial_rate: config.initial_rate,
            ceiling_rate: config.ceiling_rate,
            rate_increment: config.rate_increment,
            initial_parallel: config.initial_parallel,
            ceiling_parallel: config.ceiling_parallel,
            parallel_increment: config.parallel_increment,
            test_execution_number: 1,
        }
    }

    /// Escalate to the next cycle's load
    ///
    /// The rate grows by its increment. Once it would pass the ceiling it
    /// starts over at the initial rate and parallelism grows instead. A step
    /// that overshoots a ceiling lands on it, so both ceilings are always
    /// visited. A zero increment is treated as one.
    pub fn increment(&mut self) {
        self.test_execution_number += 1;

        if self.rate >= self.ceiling_rate {
            self.rate = self.initial_rate;
            self.parallel_count = self
                .parallel_count
                .saturating_add(self.parallel_increment.max(1))
                .min(self.ceiling_parallel);
        } else {
            self.rate = self
                .rate
                .saturating_add(self.rate_increment.max(1))
                .min(self.ceiling_rate);
        }

        debug!("Escalated load to {}", self);
    }

    /// Both the rate and parallelism ceilings have been reached
    pub fn is_completed(&self) -> bool {
        self.parallel_count >= self.ceiling_parallel && self.rate >= self.ceiling_rate
    }

    /// Duration as sent to workers: whole seconds, at least one
    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs().max(1)
    }

    /// Send the profile to every endpoint and wait for each setting to be acknowledged
    ///
    /// Inspector endpoints additionally get the management interface when one
    /// is configured; an inspector that does not answer only logs a warning.
    pub async fn apply(
        &self,
        controller: &Controller,
        endpoints: &[PeerEndpoint],
    ) -> Result<(), ExchangeError> {
        info!("Applying {} to {} endpoints", self, endpoints.len());

        let duration = self.duration_secs().to_string();
        for endpoint in endpoints {
            let topic = endpoint.topic.as_str();
            debug!("Applying test profile to {}", endpoint);

            let id = controller.set_broker(topic, &self.broker_url).await?;
            controller.confirm(&id).await?;
            let id = controller.set_rate(topic, u64::from(self.rate)).await?;
            controller.confirm(&id).await?;
            let id = controller
                .set_parallel_count(topic, self.parallel_count)
                .await?;
            controller.confirm(&id).await?;
            let id = controller.set_duration(topic, &duration).await?;
            controller.confirm(&id).await?;
            let id = controller.set_fcl(topic, self.fcl_ms).await?;
            controller.confirm(&id).await?;
            let id = controller.set_message_size(topic, self.message_size).await?;
            controller.confirm(&id).await?;

            if endpoint.role == Role::Inspector {
                if let Some(ref interface) = self.management_interface {
                    let id = controller.set_management_interface(topic, interface).await?;
                    match controller.confirm(&id).await {
                        Err(ExchangeError::NotEnoughReplies { .. }) => {
                            warn!("Inspector at {} did not acknowledge the management interface", topic)
                        }
                        other => other?,
                    }
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for TestProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "test #{} (rate {}, parallel {}, size {} bytes, {}s, fcl {} ms)",
            self.test_execution_number,
            self.rate,
            self.parallel_count,
            self.message_size,
            self.duration_secs(),
            self.fcl_ms
        )
    }
}
