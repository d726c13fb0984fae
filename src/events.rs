//! Per-job publish/subscribe for live conversion output.
//!
//! [`EventHub`] keeps one topic per job that is still being worked on. Each
//! subscriber owns a bounded `tokio::sync::mpsc` channel, and publishing never
//! waits: a subscriber whose buffer is full, or whose receiver has gone away,
//! is dropped from the topic so it cannot hold back the engine or other
//! subscribers.

use futures::Stream;
use mp3ify_common::{JobId, JobState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A transient unit of progress for one job. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutputEvent {
    #[serde(rename = "status")]
    StatusChanged(JobState),
    OutputLine(String),
    /// The next output line replaces the previous one.
    CarriageReturn,
}

impl OutputEvent {
    /// Name used for the SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "status",
            Self::OutputLine(_) => "outputLine",
            Self::CarriageReturn => "carriageReturn",
        }
    }

    /// Plain-text payload used for the SSE `data:` field.
    pub fn data(&self) -> String {
        match self {
            Self::StatusChanged(state) => state.to_string(),
            Self::OutputLine(line) => line.clone(),
            Self::CarriageReturn => String::new(),
        }
    }
}

/// An owned handle on one job's event stream.
///
/// Ends when the job's topic is closed, when the subscriber is dropped for
/// falling behind, or immediately after the final status for a job that was
/// already finished when subscribing.
pub struct Subscription {
    rx: mpsc::Receiver<OutputEvent>,
}

impl Subscription {
    /// A subscription that yields exactly one `StatusChanged(state)` and ends.
    pub fn finished(state: JobState) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel, so this cannot fail
        let _ = tx.try_send(OutputEvent::StatusChanged(state));
        Self { rx }
    }

    /// A subscription that ends without yielding anything.
    pub fn closed() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { rx }
    }

    /// Next event, or `None` once the stream has closed.
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = OutputEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Fan-out of [`OutputEvent`]s to the live subscribers of each job.
pub struct EventHub {
    buffer: usize,
    topics: Mutex<HashMap<JobId, Vec<mpsc::Sender<OutputEvent>>>>,
}

impl EventHub {
    /// Create a hub whose subscribers each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Open the topic for `id`. Opening an open topic keeps its subscribers.
    pub fn open(&self, id: JobId) {
        self.topics.lock().entry(id).or_default();
    }

    /// Subscribe to an open topic, or `None` if `id` has no open topic.
    pub fn subscribe(&self, id: JobId) -> Option<Subscription> {
        let mut topics = self.topics.lock();
        let subscribers = topics.get_mut(&id)?;

        let (tx, rx) = mpsc::channel(self.buffer);
        subscribers.push(tx);
        Some(Subscription { rx })
    }

    /// Deliver `event` to every subscriber of `id`, in publish order.
    ///
    /// Publishing to a closed or unknown topic does nothing.
    pub fn publish(&self, id: JobId, event: OutputEvent) {
        let mut topics = self.topics.lock();
        let Some(subscribers) = topics.get_mut(&id) else {
            return;
        };

        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(job_id = %id, "Dropping subscriber that fell behind");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Publish the terminal `state` for `id` and close its topic.
    ///
    /// The topic is removed in the same critical section that takes its
    /// subscribers, so a subscriber either receives the final status here or
    /// finds no topic at all. A subscriber whose buffer is full misses it, as
    /// with any other event.
    pub fn finish(&self, id: JobId, state: JobState) {
        let Some(subscribers) = self.topics.lock().remove(&id) else {
            return;
        };

        let event = OutputEvent::StatusChanged(state);
        for tx in &subscribers {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                tracing::warn!(job_id = %id, "Subscriber fell behind and missed the final status");
            }
        }
        tracing::trace!(job_id = %id, state = %state, subscribers = subscribers.len(), "Finished event topic");
    }

    /// Close the topic for `id`, ending every subscription to it.
    ///
    /// Events already buffered for a subscriber are still delivered.
    pub fn close(&self, id: JobId) {
        if let Some(subscribers) = self.topics.lock().remove(&id) {
            tracing::trace!(job_id = %id, subscribers = subscribers.len(), "Closed event topic");
        }
    }

    pub fn is_open(&self, id: JobId) -> bool {
        self.topics.lock().contains_key(&id)
    }

    /// Number of live subscribers on the topic for `id`.
    pub fn subscriber_count(&self, id: JobId) -> usize {
        self.topics
            .lock()
            .get(&id)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
