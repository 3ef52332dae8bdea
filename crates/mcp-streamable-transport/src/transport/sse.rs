//! SSE framing and the bounded outbound queue that feeds it. (spec.md C1)

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::model::JsonRpcMessage;
use crate::transport::event_store::{EventStoreError, EventStreamWriter};

/// One SSE frame's worth of payload, before it is serialized to bytes.
///
/// `data` is `None` only for priming frames (spec.md §3 SseItem):  the frame
/// exists to carry `id:`/`retry:` to the client, not to deliver a message.
#[derive(Debug, Clone)]
pub struct SseItem {
    pub data: Option<JsonRpcMessage>,
    pub event_type: SseEventType,
    pub event_id: Option<String>,
    pub reconnection_interval: Option<Duration>,
}

/// The `event:` line. `Endpoint` is the legacy SSE-transport priming frame;
/// `Priming` is the resumability priming frame; `Message` is everything
/// else. spec.md §3/§9 resolves the "priming" vs "prime" spelling question
/// in favor of `"priming"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseEventType {
    Message,
    Endpoint,
    Priming,
}

impl SseEventType {
    fn as_str(self) -> &'static str {
        match self {
            SseEventType::Message => "message",
            SseEventType::Endpoint => "endpoint",
            SseEventType::Priming => "priming",
        }
    }
}

impl SseItem {
    pub fn message(data: JsonRpcMessage) -> Self {
        Self {
            data: Some(data),
            event_type: SseEventType::Message,
            event_id: None,
            reconnection_interval: None,
        }
    }

    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            data: Some(JsonRpcMessage::Notification(
                crate::model::JsonRpcNotification {
                    jsonrpc: crate::model::JsonRpcVersion2_0,
                    method: "__endpoint__".into(),
                    params: Some(serde_json::Value::String(endpoint.into())),
                },
            )),
            event_type: SseEventType::Endpoint,
            event_id: None,
            reconnection_interval: None,
        }
    }

    pub fn priming(reconnection_interval: Duration) -> Self {
        Self {
            data: None,
            event_type: SseEventType::Priming,
            event_id: None,
            reconnection_interval: Some(reconnection_interval),
        }
    }

    /// Render the frame as raw SSE bytes, per spec.md §4.1 framing rules.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("event: ");
        out.push_str(self.event_type.as_str());
        out.push('\n');

        if let Some(id) = &self.event_id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }

        if let Some(retry) = self.reconnection_interval {
            out.push_str("retry: ");
            out.push_str(&retry.as_millis().to_string());
            out.push('\n');
        }

        match self.event_type {
            SseEventType::Endpoint => {
                let endpoint = match &self.data {
                    Some(JsonRpcMessage::Notification(n)) => {
                        n.params.as_ref().and_then(|v| v.as_str()).unwrap_or("")
                    }
                    _ => "",
                };
                out.push_str("data: ");
                out.push_str(endpoint);
                out.push('\n');
            }
            SseEventType::Priming => {
                out.push_str("data:\n");
            }
            SseEventType::Message => {
                let json = self
                    .data
                    .as_ref()
                    .and_then(|m| serde_json::to_string(m).ok())
                    .unwrap_or_else(|| "null".to_string());
                out.push_str("data: ");
                out.push_str(&json);
                out.push('\n');
            }
        }
        out.push('\n');
        out
    }
}

/// Full-queue policy for an [`SseWriter`]'s internal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPolicy {
    /// Back-pressure the sender (default; used by POST-response writers,
    /// which always have a live reader attached).
    Block,
    /// Drop the oldest queued item to make room (used by the standalone GET
    /// writer in `SessionTransport`, per spec.md §4.1/§5/§9: slow or absent
    /// GET consumers must never block senders).
    DropOldest,
}

/// Buffers outbound [`SseItem`]s and serializes them to a byte sink.
/// spec.md C1.
pub struct SseWriter {
    tx: Option<Sender<SseItem>>,
    policy: FullPolicy,
    drop_oldest: Option<Arc<DropOldestQueue>>,
    message_endpoint: Option<String>,
    disposed: Arc<std::sync::atomic::AtomicBool>,
}

/// A small MPSC-like drop-oldest queue. Implemented directly (rather than
/// on top of `tokio::sync::mpsc`, which has no drop-oldest mode) with a
/// mutex-guarded ring buffer and a notify to wake the single reader.
struct DropOldestQueue {
    inner: Mutex<std::collections::VecDeque<SseItem>>,
    capacity: usize,
    notify: tokio::sync::Notify,
    closed: std::sync::atomic::AtomicBool,
}

impl DropOldestQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: tokio::sync::Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    async fn push(&self, item: SseItem) {
        let mut buf = self.inner.lock().await;
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(item);
        drop(buf);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<SseItem> {
        loop {
            {
                let mut buf = self.inner.lock().await;
                if let Some(item) = buf.pop_front() {
                    return Some(item);
                }
                if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

impl SseWriter {
    /// Bounded, back-pressuring writer (default capacity 1 per spec.md §4.1).
    pub fn bounded(capacity: usize) -> (Self, Receiver<SseItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                policy: FullPolicy::Block,
                drop_oldest: None,
                message_endpoint: None,
                disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Drop-oldest writer used for the standalone GET stream.
    pub fn drop_oldest(capacity: usize) -> Self {
        Self {
            tx: None,
            policy: FullPolicy::DropOldest,
            drop_oldest: Some(Arc::new(DropOldestQueue::new(capacity))),
            message_endpoint: None,
            disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn with_message_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.message_endpoint = Some(endpoint.into());
        self
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Stamp and enqueue an item. If `event_stream_writer` is given and the
    /// item has no `event_id` yet, it is persisted first (spec.md §4.1).
    ///
    /// Returns `true` if the item was (or will be) delivered locally;
    /// `false` if this writer is already disposed. Persistence, if it
    /// happened, is independent of the local delivery outcome.
    pub async fn send_message(
        &self,
        mut item: SseItem,
        event_stream_writer: Option<&EventStreamWriter>,
    ) -> Result<bool, EventStoreError> {
        if self.is_disposed() {
            return Ok(false);
        }
        if let Some(writer) = event_stream_writer
            && item.event_id.is_none()
        {
            item = writer.write_event(item).await?;
        }
        Ok(self.enqueue(item).await)
    }

    /// Convenience wrapper for spec.md §4.1 `SendPrimingEvent`.
    pub async fn send_priming_event(
        &self,
        retry_interval: Duration,
        event_stream_writer: &EventStreamWriter,
    ) -> Result<bool, EventStoreError> {
        self.send_message(SseItem::priming(retry_interval), Some(event_stream_writer))
            .await
    }

    async fn enqueue(&self, item: SseItem) -> bool {
        match (&self.tx, &self.drop_oldest) {
            (Some(tx), _) => tx.send(item).await.is_ok(),
            (_, Some(q)) => {
                q.push(item).await;
                true
            }
            _ => false,
        }
    }

    /// Mark the queue closed; already-queued items still drain.
    pub fn complete(&self) {
        self.disposed.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(q) = &self.drop_oldest {
            q.close();
        }
        // Dropping the bounded sender's clone closes the channel once all
        // senders are gone; since we only ever hand out this one, drop it.
    }

    /// Idempotent; equivalent to `complete()` for this type (no separate
    /// serializer resource to free in this implementation).
    pub fn dispose(&self) {
        self.complete();
    }

    /// Drain the queue to `sink`, formatting each item as SSE, until the
    /// queue completes. spec.md §4.1 `WriteAll`.
    pub async fn write_all<W>(&self, mut sink: W, mut rx: Option<Receiver<SseItem>>) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if let Some(endpoint) = &self.message_endpoint {
            let frame = SseItem::endpoint(endpoint.clone()).render();
            sink.write_all(frame.as_bytes()).await?;
            sink.flush().await?;
        }

        if let Some(q) = &self.drop_oldest {
            while let Some(item) = q.pop().await {
                let frame = item.render();
                sink.write_all(frame.as_bytes()).await?;
                sink.flush().await?;
            }
            return Ok(());
        }

        if let Some(rx) = rx.as_mut() {
            while let Some(item) = rx.recv().await {
                let frame = item.render();
                sink.write_all(frame.as_bytes()).await?;
                sink.flush().await?;
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> FullPolicy {
        self.policy
    }

    /// Pull the next item from a drop-oldest writer's internal queue.
    /// Bounded writers hand their `Receiver` out at construction instead;
    /// this returns `None` immediately for those.
    pub async fn recv(&self) -> Option<SseItem> {
        match &self.drop_oldest {
            Some(q) => q.pop().await,
            None => None,
        }
    }
}
