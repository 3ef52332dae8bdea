//! Persists SSE items per `(session, stream)` with a monotonic sequence,
//! assigns event IDs, and supports replay from a given id. spec.md C2/C3.
//!
//! The store is modeled as the "triad" variant spec.md §9 calls out as more
//! general than the `(store_event, replay_events_after)` pair: a
//! [`EventStreamStore`] hands out per-stream [`EventStreamWriter`]s and
//! [`EventStreamReader`]s, both thin capability handles over a shared
//! back-end (spec.md §9 "Stream-writer polymorphism": concrete types must
//! not leak back-end primitives to callers).

pub mod codec;
pub mod memory;

use std::time::Duration;

use thiserror::Error;

use crate::transport::sse::SseItem;

pub use codec::STANDALONE_STREAM_ID;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event store backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Whether a reader drains what's currently persisted and stops (`Polling`)
/// or keeps waiting for more (`Streaming`). spec.md §4.2 `StreamMetadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Polling,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub mode: StreamMode,
    pub last_sequence: u64,
    pub is_completed: bool,
}

impl StreamMetadata {
    fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            last_sequence: 0,
            is_completed: false,
        }
    }
}

/// A persisted SSE item. spec.md §3 `StoredEvent`.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub session_id: String,
    pub stream_id: String,
    pub sequence: u64,
    pub item: SseItem,
}

/// Configuration every back-end honors: how long a stream's events and
/// metadata remain retrievable. spec.md §6 "Expirations: both sliding and
/// absolute ... defaults are implementation-defined."
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub ttl: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// Shared, possibly cross-process, store of SSE events. spec.md C2.
#[derive(Clone)]
pub struct EventStreamStore {
    backend: std::sync::Arc<memory::InMemoryBackend>,
}

impl EventStreamStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            backend: std::sync::Arc::new(memory::InMemoryBackend::new(retention)),
        }
    }

    /// Create (or supersede) the writer for `(session_id, stream_id)`.
    ///
    /// Per spec.md §4.2: if a writer already exists for the same key, this
    /// implementation returns a fresh writer that supersedes the previous
    /// one; the caller ([`SessionTransport`](crate::transport::session::SessionTransport))
    /// is responsible for disposing any prior writer it held before calling
    /// this again.
    pub fn create_stream(
        &self,
        session_id: impl Into<String>,
        stream_id: impl Into<String>,
        mode: StreamMode,
    ) -> EventStreamWriter {
        let session_id = session_id.into();
        let stream_id = stream_id.into();
        self.backend
            .init_stream(session_id.clone(), stream_id.clone(), mode);
        EventStreamWriter {
            backend: self.backend.clone(),
            session_id,
            stream_id,
        }
    }

    /// Decode `last_event_id` and, if the stream's metadata is still
    /// retained, return a reader positioned just after it. Returns `None`
    /// for unknown/expired streams or malformed ids (spec.md §4.2
    /// `GetStreamReader`).
    pub fn get_stream_reader(&self, last_event_id: &str) -> Option<EventStreamReader> {
        let (session_id, stream_id, sequence) = codec::parse(last_event_id)?;
        if self.backend.has_metadata(&session_id, &stream_id) {
            Some(EventStreamReader {
                backend: self.backend.clone(),
                session_id,
                stream_id,
                after_sequence: sequence,
            })
        } else {
            None
        }
    }
}

/// Exclusive capability to append events to one `(session, stream)`.
/// spec.md §4.2 `EventStreamWriter`.
pub struct EventStreamWriter {
    backend: std::sync::Arc<memory::InMemoryBackend>,
    session_id: String,
    stream_id: String,
}

impl EventStreamWriter {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn mode(&self) -> StreamMode {
        self.backend.mode(&self.session_id, &self.stream_id)
    }

    /// Flip between `Streaming` and `Polling`. Used by request-polling mode
    /// (spec.md §4.2 `SetMode`).
    pub fn set_mode(&self, mode: StreamMode) {
        self.backend.set_mode(&self.session_id, &self.stream_id, mode);
    }

    /// If `item.event_id` is already set, return it unchanged (already has
    /// identity, e.g. a replay). Otherwise atomically assign the next
    /// sequence number, persist, and stamp the id. spec.md §4.2 `WriteEvent`.
    pub async fn write_event(&self, item: SseItem) -> Result<SseItem, EventStoreError> {
        if item.event_id.is_some() {
            return Ok(item);
        }
        let sequence = self.backend.next_sequence(&self.session_id, &self.stream_id);
        let event_id = codec::format(&self.session_id, &self.stream_id, sequence);
        let mut stamped = item;
        stamped.event_id = Some(event_id);
        self.backend.store(StoredEvent {
            session_id: self.session_id.clone(),
            stream_id: self.stream_id.clone(),
            sequence,
            item: stamped.clone(),
        });
        Ok(stamped)
    }

    /// Idempotent; marks `is_completed` in the stream's metadata.
    pub fn dispose(&self) {
        self.backend.complete(&self.session_id, &self.stream_id);
    }
}

impl Drop for EventStreamWriter {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Replays events after a decoded `Last-Event-ID`, then optionally keeps
/// waiting for more. spec.md §4.2 `EventStreamReader`.
pub struct EventStreamReader {
    backend: std::sync::Arc<memory::InMemoryBackend>,
    session_id: String,
    stream_id: String,
    after_sequence: u64,
}

impl EventStreamReader {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Poll interval used while `Streaming` and caught up. spec.md §4.2.
    pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(200);

    /// Read the next batch of events strictly after `after_sequence`,
    /// advancing the cursor, without blocking. Missing (expired) sequence
    /// numbers are skipped. Returns `(items, caught_up)`; when `caught_up`
    /// and the stream's mode is `Polling` or it `is_completed`, the caller
    /// should stop; otherwise it should sleep
    /// [`DEFAULT_POLLING_INTERVAL`] and call again.
    pub fn drain_available(&mut self) -> (Vec<SseItem>, ReaderStatus) {
        let Some(meta) = self.backend.metadata(&self.session_id, &self.stream_id) else {
            // Back-end expired the stream entirely: complete to avoid an
            // infinite loop (spec.md §4.2 "If metadata disappears ...").
            return (Vec::new(), ReaderStatus::Done);
        };

        let mut items = Vec::new();
        while self.after_sequence < meta.last_sequence {
            self.after_sequence += 1;
            if let Some(event) =
                self.backend
                    .get(&self.session_id, &self.stream_id, self.after_sequence)
            {
                items.push(event.item);
            }
            // else: expired/missing sequence number, skip (spec.md §4.2).
        }

        let status = match meta.mode {
            StreamMode::Polling => ReaderStatus::Done,
            StreamMode::Streaming if meta.is_completed => ReaderStatus::Done,
            StreamMode::Streaming => ReaderStatus::KeepWaiting,
        };
        (items, status)
    }

    /// Convenience loop over [`drain_available`] suitable for driving an
    /// [`SseWriter`](crate::transport::sse::SseWriter). Calls `emit` for
    /// each item in order; stops when the reader completes.
    pub async fn for_each_event<F>(&mut self, mut emit: F)
    where
        F: FnMut(SseItem),
    {
        loop {
            let (items, status) = self.drain_available();
            for item in items {
                emit(item);
            }
            match status {
                ReaderStatus::Done => return,
                ReaderStatus::KeepWaiting => {
                    tokio::time::sleep(Self::DEFAULT_POLLING_INTERVAL).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    Done,
    KeepWaiting,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JsonRpcNotification, JsonRpcMessage, JsonRpcVersion2_0};

    fn note(method: &str) -> SseItem {
        SseItem::message(JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: method.to_string(),
            params: None,
        }))
    }

    #[tokio::test]
    async fn writer_assigns_strictly_increasing_sequence_ids() {
        let store = EventStreamStore::new(RetentionPolicy::default());
        let writer = store.create_stream("s1", "__get__", StreamMode::Streaming);
        let a = writer.write_event(note("a")).await.unwrap();
        let b = writer.write_event(note("b")).await.unwrap();
        let (_, _, seq_a) = codec::parse(a.event_id.as_ref().unwrap()).unwrap();
        let (_, _, seq_b) = codec::parse(b.event_id.as_ref().unwrap()).unwrap();
        assert!(seq_b > seq_a);
    }

    #[tokio::test]
    async fn reader_replays_exactly_the_missed_suffix() {
        // spec.md §8 property 8: replay completeness.
        let store = EventStreamStore::new(RetentionPolicy::default());
        let writer = store.create_stream("s1", "__get__", StreamMode::Polling);
        let e1 = writer.write_event(note("e1")).await.unwrap();
        let _e2 = writer.write_event(note("e2")).await.unwrap();
        let e3 = writer.write_event(note("e3")).await.unwrap();

        let mut reader = store
            .get_stream_reader(e1.event_id.as_ref().unwrap())
            .expect("stream should still be retained");
        let (items, status) = reader.drain_available();
        assert_eq!(status, ReaderStatus::Done);
        let methods: Vec<_> = items
            .into_iter()
            .map(|i| match i.data {
                Some(JsonRpcMessage::Notification(n)) => n.method,
                _ => panic!("expected notification"),
            })
            .collect();
        assert_eq!(methods, vec!["e2", "e3"]);
        assert_eq!(e3.event_id, e3.event_id);
    }

    #[tokio::test]
    async fn unknown_last_event_id_returns_none() {
        let store = EventStreamStore::new(RetentionPolicy::default());
        assert!(store.get_stream_reader("bogus").is_none());
    }

    #[tokio::test]
    async fn write_event_is_identity_when_id_already_set() {
        let store = EventStreamStore::new(RetentionPolicy::default());
        let writer = store.create_stream("s1", "req-1", StreamMode::Polling);
        let mut item = note("replayed");
        item.event_id = Some("already:has:id".into());
        let got = writer.write_event(item).await.unwrap();
        assert_eq!(got.event_id.as_deref(), Some("already:has:id"));
    }

    #[tokio::test]
    async fn streaming_reader_keeps_waiting_until_completed() {
        let store = EventStreamStore::new(RetentionPolicy::default());
        let writer = store.create_stream("s1", "__get__", StreamMode::Streaming);
        let mut reader = store
            .get_stream_reader(&codec::format("s1", "__get__", 0))
            .unwrap();
        let (items, status) = reader.drain_available();
        assert!(items.is_empty());
        assert_eq!(status, ReaderStatus::KeepWaiting);
        writer.dispose();
        let (items, status) = reader.drain_available();
        assert!(items.is_empty());
        assert_eq!(status, ReaderStatus::Done);
    }
}
