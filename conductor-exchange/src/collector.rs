//! Buffer of inbound notes and the waits built on top of it
//!
//! The receive task pushes every decoded note into a [`Collector`]; the
//! controller drains it from its own task. Notes are buffered until drained,
//! so a note arriving between two polls is never lost.

use conductor_protocol::{CorrelationId, Note};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::trace;

use crate::error::NotEnoughReplies;

/// Thread-safe buffer of inbound notes
#[derive(Default)]
pub struct Collector {
    queue: Mutex<VecDeque<Note>>,
    arrived: Notify,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a note and wake a waiting consumer
    pub fn push(&self, note: Note) {
        trace!("Collected {}", note);
        self.queue.lock().push_back(note);
        self.arrived.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Discard everything buffered, returning how many notes were dropped
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    /// Drain every buffered note
    pub fn collect(&self) -> Vec<Note> {
        self.queue.lock().drain(..).collect()
    }

    /// Drain the notes accepted by `filter`, leaving the rest in arrival order
    pub fn collect_matching<F>(&self, filter: F) -> Vec<Note>
    where
        F: Fn(&Note) -> bool,
    {
        let mut queue = self.queue.lock();
        let mut matched = Vec::new();
        let mut kept = VecDeque::with_capacity(queue.len());
        for note in queue.drain(..) {
            if filter(&note) {
                matched.push(note);
            } else {
                kept.push_back(note);
            }
        }
        *queue = kept;
        matched
    }

    /// Poll until something is buffered, waiting up to `wait` between empty
    /// polls; gives up with an empty list after `retries` waits
    pub async fn collect_with_retries(&self, wait: Duration, retries: u32) -> Vec<Note> {
        self.collect_matching_with_retries(|_| true, wait, retries)
            .await
    }

    /// [`Collector::collect_with_retries`] restricted to notes accepted by `filter`
    pub async fn collect_matching_with_retries<F>(
        &self,
        filter: F,
        wait: Duration,
        retries: u32,
    ) -> Vec<Note>
    where
        F: Fn(&Note) -> bool,
    {
        let mut remaining = retries;
        loop {
            let notes = self.collect_matching(&filter);
            if !notes.is_empty() || remaining == 0 {
                return notes;
            }
            remaining -= 1;
            let _ = timeout(wait, self.arrived.notified()).await;
        }
    }

    /// Keep collecting matching notes until `retries` consecutive polls,
    /// each waiting up to `wait`, bring nothing new
    pub async fn collect_until_stale<F>(&self, filter: F, wait: Duration, retries: u32) -> Vec<Note>
    where
        F: Fn(&Note) -> bool,
    {
        let mut collected = Vec::new();
        let mut idle = 0;
        while idle < retries {
            let batch = self.collect_matching(&filter);
            if batch.is_empty() {
                idle += 1;
                let _ = timeout(wait, self.arrived.notified()).await;
            } else {
                idle = 0;
                collected.extend(batch);
            }
        }
        collected.extend(self.collect_matching(&filter));
        collected
    }

    /// Accumulate notes until `expected` have arrived or `limit` elapses
    pub async fn wait_for_replies(
        &self,
        expected: usize,
        limit: Duration,
    ) -> Result<Vec<Note>, NotEnoughReplies> {
        self.wait_for_matching(|_| true, expected, limit).await
    }

    /// Accumulate replies to one request until `expected` have arrived or `limit` elapses
    pub async fn wait_for_correlated(
        &self,
        correlation_id: &CorrelationId,
        expected: usize,
        limit: Duration,
    ) -> Result<Vec<Note>, NotEnoughReplies> {
        self.wait_for_matching(|note| note.answers(correlation_id), expected, limit)
            .await
    }

    /// Accumulate notes accepted by `filter` until `expected` have arrived or
    /// `limit` elapses; on timeout the error carries what did arrive
    pub async fn wait_for_matching<F>(
        &self,
        filter: F,
        expected: usize,
        limit: Duration,
    ) -> Result<Vec<Note>, NotEnoughReplies>
    where
        F: Fn(&Note) -> bool,
    {
        let deadline = Instant::now() + limit;
        let mut replies = Vec::new();

        loop {
            replies.extend(self.collect_matching(&filter));
            if replies.len() >= expected {
                return Ok(replies);
            }

            if timeout_at(deadline, self.arrived.notified()).await.is_err() {
                replies.extend(self.collect_matching(&filter));
                if replies.len() >= expected {
                    return Ok(replies);
                }
                return Err(NotEnoughReplies { expected, replies });
            }
        }
    }

    /// Wait for the next note, however long it takes
    ///
    /// Meant for peer loops that select on their own shutdown signal.
    pub async fn next(&self) -> Note {
        loop {
            let next = self.queue.lock().pop_front();
            if let Some(note) = next {
                return note;
            }
            self.arrived.notified().await;
        }
    }
}
