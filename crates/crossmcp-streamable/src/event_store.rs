//! Pluggable event store for `Last-Event-ID` resumption.
//!
//! Event ids are monotonically ordered within a stream and encode the stream
//! they belong to, so a bare `Last-Event-ID` is enough to locate the stream
//! being resumed. Replay is idempotent: the same `last_event_id` always
//! yields the same suffix in the same order.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

/// One stored event: its resumption id and the JSON payload it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Resumption id (`<stream_id>_<seq>`)
    pub id: String,
    /// The SSE data payload
    pub payload: String,
}

/// Events replayed for a reconnecting client.
#[derive(Debug, Clone)]
pub struct ReplaySet {
    /// The stream the `Last-Event-ID` belonged to
    pub stream_id: String,
    /// Events after the given id, in original order
    pub events: Vec<StoredEvent>,
}

/// Persistence hook for SSE events. Implementations must be internally
/// synchronized.
#[async_trait]
pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Persist an event on a stream and return its id.
    async fn append(&self, stream_id: &str, payload: &str) -> StoredEvent;

    /// Find the stream owning `last_event_id` and return every later event
    /// on it. `None` when the id is unknown (expired or never existed).
    async fn replay_after(&self, last_event_id: &str) -> Option<ReplaySet>;

    /// Drop a stream's history.
    async fn drop_stream(&self, stream_id: &str);
}

#[derive(Debug, Default)]
struct StreamLog {
    next_seq: u64,
    events: VecDeque<(u64, String)>,
}

/// In-memory event store with a bounded per-stream history.
#[derive(Debug)]
pub struct InMemoryEventStore {
    streams: DashMap<String, StreamLog>,
    max_events_per_stream: usize,
}

impl InMemoryEventStore {
    /// Store retaining at most 1024 events per stream.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Store retaining at most `max_events_per_stream` events per stream;
    /// the oldest are evicted first.
    pub fn with_capacity(max_events_per_stream: usize) -> Self {
        Self {
            streams: DashMap::new(),
            max_events_per_stream,
        }
    }

    fn format_id(stream_id: &str, seq: u64) -> String {
        format!("{stream_id}_{seq}")
    }

    fn parse_id(event_id: &str) -> Option<(&str, u64)> {
        let (stream_id, seq) = event_id.rsplit_once('_')?;
        Some((stream_id, seq.parse().ok()?))
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: &str, payload: &str) -> StoredEvent {
        let mut log = self.streams.entry(stream_id.to_string()).or_default();
        let seq = log.next_seq;
        log.next_seq += 1;
        log.events.push_back((seq, payload.to_string()));
        while log.events.len() > self.max_events_per_stream {
            log.events.pop_front();
        }
        StoredEvent {
            id: Self::format_id(stream_id, seq),
            payload: payload.to_string(),
        }
    }

    async fn replay_after(&self, last_event_id: &str) -> Option<ReplaySet> {
        let (stream_id, after_seq) = Self::parse_id(last_event_id)?;
        let log = self.streams.get(stream_id)?;
        let events = log
            .events
            .iter()
            .filter(|(seq, _)| *seq > after_seq)
            .map(|(seq, payload)| StoredEvent {
                id: Self::format_id(stream_id, *seq),
                payload: payload.clone(),
            })
            .collect();
        Some(ReplaySet {
            stream_id: stream_id.to_string(),
            events,
        })
    }

    async fn drop_stream(&self, stream_id: &str) {
        self.streams.remove(stream_id);
    }
}
