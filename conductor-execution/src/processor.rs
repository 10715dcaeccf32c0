//! Per-cycle verdict

use conductor_exchange::PeerSet;
use conductor_protocol::{Command, CorrelationId, MessageId, Note, Payload, PeerId};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::profile::TestProfile;

/// Judges one test cycle from the notes collected while it ran
///
/// A cycle succeeds only when every worker of the cycle reported success, no
/// worker reported a failure, no latency exceeded the fail condition and no
/// peer answered with an error.
///
/// Only notes from the peers of the cycle are considered, and an outcome
/// counts only when it answers one of the cycle's Start requests. Each worker
/// contributes at most one outcome.
#[derive(Debug)]
pub struct TestProcessor {
    quorum: usize,
    fcl_ms: u64,
    at_ceiling: bool,
    members: HashSet<PeerId>,
    workers: HashSet<PeerId>,
    starts: Vec<CorrelationId>,
    reported: HashSet<PeerId>,
    successes: usize,
    failures: usize,
    seen: HashSet<MessageId>,
    reasons: Vec<String>,
}

impl TestProcessor {
    /// Referee for a cycle run by the workers of `peers`
    pub fn new(profile: &TestProfile, peers: &PeerSet) -> Self {
        let workers: HashSet<PeerId> = peers.worker_peers().map(|(id, _)| id.clone()).collect();
        Self {
            quorum: workers.len(),
            fcl_ms: profile.fcl_ms,
            at_ceiling: profile.is_completed(),
            members: peers.iter().map(|(id, _)| id.clone()).collect(),
            workers,
            starts: Vec::new(),
            reported: HashSet::new(),
            successes: 0,
            failures: 0,
            seen: HashSet::new(),
            reasons: Vec::new(),
        }
    }

    /// Count outcomes answering these Start requests
    pub fn expect_outcomes_of(&mut self, starts: impl IntoIterator<Item = CorrelationId>) {
        self.starts.extend(starts);
    }

    /// Start requests whose outcomes are counted
    pub fn starts(&self) -> &[CorrelationId] {
        &self.starts
    }

    /// Forget everything counted so far
    pub fn reset_notifications(&mut self) {
        self.successes = 0;
        self.failures = 0;
        self.reported.clear();
        self.seen.clear();
        self.reasons.clear();
    }

    /// Account for a batch of collected notes
    ///
    /// Redelivered notes are counted once. Notes that carry no verdict, or
    /// that come from outside the cycle, are ignored.
    pub fn process(&mut self, notes: &[Note]) {
        for note in notes {
            if !self.seen.insert(note.message_id.clone()) {
                debug!("Ignoring redelivered {}", note);
                continue;
            }
            if !self.members.contains(&note.origin.id) {
                debug!("Ignoring {} from a peer outside this cycle", note);
                continue;
            }
            if note.is_test_outcome() && !self.accepts_outcome(note) {
                continue;
            }

            match (&note.command, &note.payload) {
                (Command::NotifySuccess, _) if note.is_notification() => {
                    debug!("{} reported success", note.origin.info);
                    self.successes += 1;
                }
                (Command::NotifyFail, payload) if note.is_notification() => {
                    let message = payload.message().unwrap_or("no reason given");
                    warn!("{} reported failure: {}", note.origin.info, message);
                    self.failures += 1;
                    self.reasons
                        .push(format!("{}: {}", note.origin.info.name, message));
                }
                (Command::AbnormalDisconnect, payload) if note.is_notification() => {
                    let message = payload.message().unwrap_or("disconnected");
                    warn!("{} disconnected abnormally: {}", note.origin.info, message);
                    self.reasons
                        .push(format!("{}: {}", note.origin.info.name, message));
                }
                (Command::Stats, Payload::Stats(report)) if note.is_response() => {
                    debug!(
                        "{} reports rate {:.1} and latency {:.2} ms",
                        note.origin.info, report.rate, report.latency
                    );
                    if report.latency > self.fcl_ms as f64 {
                        warn!(
                            "{} latency {:.2} ms exceeds the fail condition of {} ms",
                            note.origin.info, report.latency, self.fcl_ms
                        );
                        self.reasons.push(format!(
                            "{}: latency {:.2} ms above {} ms",
                            note.origin.info.name, report.latency, self.fcl_ms
                        ));
                    }
                }
                (Command::InternalError, payload) if note.is_response() => {
                    let message = payload.message().unwrap_or("internal error");
                    warn!("{} answered with an error: {}", note.origin.info, message);
                    self.reasons
                        .push(format!("{}: {}", note.origin.info.name, message));
                }
                _ => {}
            }
        }
    }

    fn accepts_outcome(&mut self, note: &Note) -> bool {
        if !self.starts.iter().any(|id| note.answers(id)) {
            debug!("Ignoring {} answering an earlier run", note);
            return false;
        }
        if !self.workers.contains(&note.origin.id) {
            debug!("Ignoring outcome from {}, not a worker in this cycle", note.origin.info);
            return false;
        }
        if !self.reported.insert(note.origin.id.clone()) {
            debug!("{} already reported this cycle", note.origin.info);
            return false;
        }
        true
    }

    /// Record a failure that did not arrive as a note
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    /// Success and failure notifications counted so far
    pub fn outcomes(&self) -> usize {
        self.successes + self.failures
    }

    /// Outcomes still missing for the quorum
    pub fn pending(&self) -> usize {
        self.quorum.saturating_sub(self.outcomes())
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Every worker has reported
    pub fn is_settled(&self) -> bool {
        self.outcomes() >= self.quorum
    }

    pub fn is_successful(&self) -> bool {
        self.quorum > 0
            && self.successes >= self.quorum
            && self.failures == 0
            && self.reasons.is_empty()
    }

    /// The cycle ran at both ceilings of the ramp
    pub fn is_completed(&self) -> bool {
        self.at_ceiling
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}
