//! In-memory [`EventStreamStore`](super::EventStreamStore) back-end.
//!
//! Keyed the way spec.md §6 describes the persisted-state layout
//! (`mcp:sse:meta:{sessionId}:{streamId}`, `mcp:sse:event:{eventId}`), just
//! without an actual external store underneath — a distributed-cache or
//! database back-end would implement the same shape behind these two maps.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{RetentionPolicy, StoredEvent, StreamMetadata, StreamMode};

type StreamKey = (String, String);

pub(super) struct InMemoryBackend {
    #[allow(dead_code)]
    retention: RetentionPolicy,
    metadata: Mutex<HashMap<StreamKey, StreamMetadata>>,
    events: Mutex<HashMap<(StreamKey, u64), StoredEvent>>,
}

impl InMemoryBackend {
    pub(super) fn new(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            metadata: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
        }
    }

    pub(super) fn init_stream(&self, session_id: String, stream_id: String, mode: StreamMode) {
        let key = (session_id, stream_id);
        self.metadata
            .lock()
            .unwrap()
            .insert(key, StreamMetadata::new(mode));
    }

    pub(super) fn has_metadata(&self, session_id: &str, stream_id: &str) -> bool {
        let key = (session_id.to_string(), stream_id.to_string());
        self.metadata.lock().unwrap().contains_key(&key)
    }

    pub(super) fn metadata(&self, session_id: &str, stream_id: &str) -> Option<StreamMetadata> {
        let key = (session_id.to_string(), stream_id.to_string());
        self.metadata.lock().unwrap().get(&key).cloned()
    }

    pub(super) fn mode(&self, session_id: &str, stream_id: &str) -> StreamMode {
        self.metadata(session_id, stream_id)
            .map(|m| m.mode)
            .unwrap_or(StreamMode::Streaming)
    }

    pub(super) fn set_mode(&self, session_id: &str, stream_id: &str, mode: StreamMode) {
        let key = (session_id.to_string(), stream_id.to_string());
        if let Some(meta) = self.metadata.lock().unwrap().get_mut(&key) {
            meta.mode = mode;
        }
    }

    pub(super) fn next_sequence(&self, session_id: &str, stream_id: &str) -> u64 {
        let key = (session_id.to_string(), stream_id.to_string());
        let mut metadata = self.metadata.lock().unwrap();
        let meta = metadata
            .entry(key)
            .or_insert_with(|| StreamMetadata::new(StreamMode::Streaming));
        meta.last_sequence += 1;
        meta.last_sequence
    }

    pub(super) fn store(&self, event: StoredEvent) {
        let key = (
            (event.session_id.clone(), event.stream_id.clone()),
            event.sequence,
        );
        self.events.lock().unwrap().insert(key, event);
    }

    pub(super) fn get(
        &self,
        session_id: &str,
        stream_id: &str,
        sequence: u64,
    ) -> Option<StoredEvent> {
        let key = (
            (session_id.to_string(), stream_id.to_string()),
            sequence,
        );
        self.events.lock().unwrap().get(&key).cloned()
    }

    pub(super) fn complete(&self, session_id: &str, stream_id: &str) {
        let key = (session_id.to_string(), stream_id.to_string());
        if let Some(meta) = self.metadata.lock().unwrap().get_mut(&key) {
            meta.is_completed = true;
        }
    }
}
