//! Owns session state and coordinates many concurrent [`PostTransport`]s
//! with one standalone GET stream. spec.md C5.
//!
//! # Implementations
//!
//! * [`local::LocalSessionManager`] — in-memory session registry (default).
//! * [`stateless::StatelessSessionManager`] — rejects session-carrying
//!   operations, used when stateful mode is disabled (spec.md §3 "in
//!   stateless mode, `SendMessageAsync` ... and server→client requests
//!   fail fast").

pub mod local;
pub mod stateless;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::model::JsonRpcMessage;
use crate::transport::context::MessageContext;
use crate::transport::event_store::{
    EventStoreError, EventStreamReader, EventStreamStore, EventStreamWriter, STANDALONE_STREAM_ID,
    StreamMode,
};
use crate::transport::post::{PostTransport, PostTransportError};
use crate::transport::sse::{SseItem, SseWriter};

pub type SessionId = Arc<str>;

/// Generate a random session id: 128 bits, hex-encoded, all within the
/// visible-ASCII range required by spec.md §3/§6.
pub fn generate_session_id() -> SessionId {
    let bytes: [u8; 16] = rand::random();
    let mut hex = String::with_capacity(32);
    for b in bytes {
        hex.push_str(&format!("{b:02x}"));
    }
    hex.into()
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is disposed")]
    Disposed,
    #[error("operation not supported in stateless mode")]
    StatelessViolation,
    #[error("a standalone GET stream is already open for this session")]
    SecondGetRejected,
    #[error("unknown or expired Last-Event-ID")]
    ResumptionMiss,
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
    #[error(transparent)]
    PostTransport(#[from] PostTransportError),
}

/// Item handed to whatever dispatcher drains a session's inbox: the
/// message plus its [`MessageContext`] (principal, execution context, and
/// the `relatedTransport` reply callback).
pub type InboxItem = (JsonRpcMessage, MessageContext);

/// Creates, looks up, and disposes of [`SessionTransport`]s. spec.md §4.4
/// session lifecycle (`Initialize`, `HandleGet`/`HandlePost` dispatch,
/// `HandleDelete`).
pub trait SessionManager: Send + Sync {
    /// Create a brand-new, registered session.
    fn create_session(&self) -> impl Future<Output = (Arc<SessionTransport>, Receiver<InboxItem>)> + Send;

    fn get_session(&self, id: &str) -> impl Future<Output = Option<Arc<SessionTransport>>> + Send;

    /// spec.md §4.4 `HandleDelete`: dispose and forget. A no-op for an
    /// unknown id.
    fn terminate_session(&self, id: &str) -> impl Future<Output = ()> + Send;
}

/// What `handle_post` produced, per spec.md §3 `PostTransport` invariant.
pub enum PostOutcome {
    /// No pending request id: the caller should respond `202 Accepted`
    /// with an empty body.
    Accepted,
    /// A request was present; relay `rx` as the SSE response body until it
    /// closes (spec.md §4.3 `StopOnFinalResponse`).
    Streaming {
        post: Arc<PostTransport>,
        rx: Receiver<SseItem>,
    },
}

/// What `handle_get` produced, per spec.md §4.4 `HandleGet`.
pub enum GetOutcome {
    /// Serve (optionally after replaying missed events) from the standalone
    /// writer, continuing to stream live unsolicited messages.
    Standalone {
        replay: Option<EventStreamReader>,
        writer: Arc<SseWriter>,
        priming: Option<SseItem>,
    },
    /// The client's `Last-Event-ID` actually pointed at a POST-response
    /// stream, not `"__get__"`: replay it and close (spec.md §4.4).
    ReplayOnly { replay: EventStreamReader },
}

struct StandaloneState {
    writer: Arc<SseWriter>,
    event_writer: Option<Arc<EventStreamWriter>>,
    get_open: bool,
}

const STANDALONE_QUEUE_CAPACITY: usize = 16;

/// spec.md C5. One instance per logical MCP session.
pub struct SessionTransport {
    id: SessionId,
    negotiated_protocol_version: AsyncMutex<Option<String>>,
    stateless: bool,
    #[allow(dead_code)]
    flow_execution_context: bool,
    retry_interval: Duration,
    supports_resumability: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    inbox_tx: Sender<InboxItem>,
    event_store: Option<EventStreamStore>,
    standalone: AsyncMutex<StandaloneState>,
    disposal_token: CancellationToken,
    disposed: AtomicBool,
}

impl SessionTransport {
    pub fn new(
        id: SessionId,
        stateless: bool,
        flow_execution_context: bool,
        retry_interval: Duration,
        supports_resumability: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        event_store: Option<EventStreamStore>,
    ) -> (Arc<Self>, Receiver<InboxItem>) {
        let (inbox_tx, inbox_rx) = mpsc::channel(64);
        let standalone = StandaloneState {
            writer: Arc::new(SseWriter::drop_oldest(STANDALONE_QUEUE_CAPACITY)),
            event_writer: None,
            get_open: false,
        };
        let session = Arc::new(Self {
            id,
            negotiated_protocol_version: AsyncMutex::new(None),
            stateless,
            flow_execution_context,
            retry_interval,
            supports_resumability,
            inbox_tx,
            event_store,
            standalone: AsyncMutex::new(standalone),
            disposal_token: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        });
        (session, inbox_rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn disposal_token(&self) -> CancellationToken {
        self.disposal_token.clone()
    }

    pub async fn negotiated_protocol_version(&self) -> Option<String> {
        self.negotiated_protocol_version.lock().await.clone()
    }

    /// Invoked by the caller when the inbound message is an `initialize`
    /// request (spec.md §4.3 step 2). The caller is responsible for
    /// extracting `protocolVersion` from the (out-of-scope) params grammar.
    pub async fn on_initialize_received(&self, protocol_version: impl Into<String>) {
        *self.negotiated_protocol_version.lock().await = Some(protocol_version.into());
    }

    async fn push_to_inbox(&self, message: JsonRpcMessage, ctx: MessageContext) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        self.inbox_tx
            .send((message, ctx))
            .await
            .map_err(|_| SessionError::Disposed)
    }

    /// spec.md §4.3 `PostTransport` construction + §4.4 `HandlePost`.
    pub async fn handle_post(
        self: &Arc<Self>,
        message: JsonRpcMessage,
    ) -> Result<PostOutcome, SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }

        let pending_request_id = match &message {
            JsonRpcMessage::Request(r) => Some(r.id.clone()),
            _ => None,
        };

        let Some(pending_request_id) = pending_request_id else {
            self.push_to_inbox(message, MessageContext::new()).await?;
            return Ok(PostOutcome::Accepted);
        };

        let stream_id = pending_request_id.to_string();
        let (post, rx) = PostTransport::new(stream_id.clone(), Some(pending_request_id), self.stateless);

        let event_writer = match &self.event_store {
            Some(store) => Some(Arc::new(store.create_stream(
                self.id.to_string(),
                stream_id,
                StreamMode::Streaming,
            ))),
            None => None,
        };

        let negotiated = self.negotiated_protocol_version().await;
        let resumable = negotiated
            .as_deref()
            .map(|v| (self.supports_resumability)(v))
            .unwrap_or(false);

        if resumable && let Some(ew) = &event_writer {
            let _ = post
                .writer()
                .send_priming_event(self.retry_interval, ew)
                .await;
        }

        let session = self.clone();
        let reply_post = post.clone();
        let reply_event_writer = event_writer.clone();
        let reply = move |msg: JsonRpcMessage| {
            let post = reply_post.clone();
            let session = session.clone();
            let ew = reply_event_writer.clone();
            Box::pin(async move {
                match post.send_message(msg.clone(), ew.as_deref()).await {
                    Ok(true) => true,
                    Ok(false) => session.fallback_to_standalone(msg).await,
                    Err(_) => {
                        tracing::warn!("dropping outbound message: stateless violation");
                        false
                    }
                }
            }) as futures::future::BoxFuture<'static, bool>
        };

        let close_post = post.clone();
        let close_sse_stream = move || close_post.cancel();

        let close_session = self.clone();
        let close_standalone_sse_stream = move || {
            let session = close_session.clone();
            tokio::spawn(async move { session.close_standalone_sse_stream().await });
        };

        let ctx = MessageContext::new()
            .with_reply(Arc::new(reply))
            .with_close_sse_stream(Arc::new(close_sse_stream))
            .with_close_standalone_sse_stream(Arc::new(close_standalone_sse_stream));
        self.push_to_inbox(message, ctx).await?;

        Ok(PostOutcome::Streaming { post, rx })
    }

    /// Late-message fallback per spec.md §4.3/§7: a message that missed its
    /// PostTransport's window is re-routed to the standalone writer so it
    /// still has a chance to reach the client, rather than being lost.
    async fn fallback_to_standalone(&self, message: JsonRpcMessage) -> bool {
        if self.stateless || self.is_disposed() {
            tracing::warn!("late message could not be delivered and was dropped");
            return false;
        }
        let standalone = self.standalone.lock().await;
        let item = SseItem::message(message);
        standalone
            .writer
            .send_message(item, standalone.event_writer.as_deref())
            .await
            .unwrap_or(false)
    }

    /// spec.md §4.4 `HandleGet`.
    pub async fn handle_get(
        self: &Arc<Self>,
        last_event_id: Option<String>,
    ) -> Result<GetOutcome, SessionError> {
        if self.stateless {
            return Err(SessionError::StatelessViolation);
        }
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }

        if let Some(last_id) = last_event_id {
            let Some(store) = &self.event_store else {
                return Err(SessionError::ResumptionMiss);
            };
            let reader = store
                .get_stream_reader(&last_id)
                .ok_or(SessionError::ResumptionMiss)?;

            if reader.stream_id() != STANDALONE_STREAM_ID {
                // Client is resuming a POST response by accident.
                return Ok(GetOutcome::ReplayOnly { replay: reader });
            }

            let mut standalone = self.standalone.lock().await;
            if standalone.get_open {
                return Err(SessionError::SecondGetRejected);
            }
            standalone.get_open = true;
            return Ok(GetOutcome::Standalone {
                replay: Some(reader),
                writer: standalone.writer.clone(),
                priming: None,
            });
        }

        let mut standalone = self.standalone.lock().await;
        if standalone.get_open {
            return Err(SessionError::SecondGetRejected);
        }
        standalone.get_open = true;

        let negotiated = self.negotiated_protocol_version().await;
        let resumable = negotiated
            .as_deref()
            .map(|v| (self.supports_resumability)(v))
            .unwrap_or(false);

        let priming = if resumable && let Some(store) = &self.event_store {
            let writer = Arc::new(store.create_stream(
                self.id.to_string(),
                STANDALONE_STREAM_ID.to_string(),
                StreamMode::Streaming,
            ));
            standalone.event_writer = Some(writer.clone());
            let item = writer.write_event(SseItem::priming(self.retry_interval)).await?;
            Some(item)
        } else {
            None
        };

        Ok(GetOutcome::Standalone {
            replay: None,
            writer: standalone.writer.clone(),
            priming,
        })
    }

    /// Marks the GET slot free again; called by the HTTP layer when the
    /// response body ends for any reason (spec.md §4.4 "at most one GET").
    pub async fn mark_get_closed(&self) {
        self.standalone.lock().await.get_open = false;
    }

    /// spec.md §4.4 `SendMessage` (unsolicited). Refused in stateless mode.
    pub async fn send_message(&self, message: JsonRpcMessage) -> Result<bool, SessionError> {
        if self.stateless {
            return Err(SessionError::StatelessViolation);
        }
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        let standalone = self.standalone.lock().await;
        let item = SseItem::message(message);
        Ok(standalone
            .writer
            .send_message(item, standalone.event_writer.as_deref())
            .await?)
    }

    /// spec.md §4.4/§4.7 `CloseStandaloneSseStream`.
    pub async fn close_standalone_sse_stream(&self) {
        self.standalone.lock().await.writer.complete();
    }

    /// spec.md §4.4 `Dispose`. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disposal_token.cancel();
        let standalone = self.standalone.lock().await;
        standalone.writer.dispose();
        if let Some(ew) = &standalone.event_writer {
            ew.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JsonRpcNotification, JsonRpcRequest, JsonRpcVersion2_0, RequestId};
    use crate::transport::event_store::RetentionPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn always_resumable(_: &str) -> bool {
        true
    }

    fn never_resumable(_: &str) -> bool {
        false
    }

    fn session(
        stateless: bool,
        with_store: bool,
        resumable: fn(&str) -> bool,
    ) -> (Arc<SessionTransport>, Receiver<InboxItem>) {
        let store = with_store.then(|| EventStreamStore::new(RetentionPolicy::default()));
        SessionTransport::new(
            generate_session_id(),
            stateless,
            false,
            Duration::from_secs(1),
            Arc::new(resumable),
            store,
        )
    }

    #[tokio::test]
    async fn notification_only_post_yields_accepted() {
        let (session, mut inbox) = session(false, false, never_resumable);
        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "notifications/progress".into(),
            params: None,
        });
        match session.handle_post(notification).await.unwrap() {
            PostOutcome::Accepted => {}
            PostOutcome::Streaming { .. } => panic!("expected Accepted"),
        }
        assert!(inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn post_with_request_streams_until_correlated_response() {
        let (session, mut inbox) = session(false, false, never_resumable);
        let request = JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JsonRpcVersion2_0,
            id: RequestId::Number(1),
            method: "tools/call".into(),
            params: None,
        });
        let PostOutcome::Streaming { post, mut rx } = session.handle_post(request).await.unwrap()
        else {
            panic!("expected Streaming");
        };
        let (_msg, ctx) = inbox.recv().await.unwrap();
        let response = JsonRpcMessage::Response(crate::model::JsonRpcResponse {
            jsonrpc: JsonRpcVersion2_0,
            id: RequestId::Number(1),
            result: json!({}),
        });
        assert!(ctx.reply(response).await);
        assert!(post.is_finished());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn second_get_is_rejected_while_one_is_open() {
        let (session, _inbox) = session(false, false, never_resumable);
        let first = session.handle_get(None).await;
        assert!(matches!(first, Ok(GetOutcome::Standalone { .. })));
        let second = session.handle_get(None).await;
        assert!(matches!(second, Err(SessionError::SecondGetRejected)));
        session.mark_get_closed().await;
        let third = session.handle_get(None).await;
        assert!(matches!(third, Ok(GetOutcome::Standalone { .. })));
    }

    #[tokio::test]
    async fn stateless_session_refuses_get_and_send() {
        let (session, _inbox) = session(true, false, never_resumable);
        assert!(matches!(
            session.handle_get(None).await,
            Err(SessionError::StatelessViolation)
        ));
        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "notifications/progress".into(),
            params: None,
        });
        assert!(matches!(
            session.send_message(notification).await,
            Err(SessionError::StatelessViolation)
        ));
    }

    #[tokio::test]
    async fn pre_resumability_protocol_gets_no_priming() {
        let (session, _inbox) = session(false, true, never_resumable);
        session.on_initialize_received("2024-11-05").await;
        let GetOutcome::Standalone { priming, .. } = session.handle_get(None).await.unwrap()
        else {
            panic!("expected Standalone");
        };
        assert!(priming.is_none());
    }

    #[tokio::test]
    async fn post_resumability_protocol_gets_priming() {
        let (session, _inbox) = session(false, true, always_resumable);
        session.on_initialize_received("2025-11-25").await;
        let GetOutcome::Standalone { priming, .. } = session.handle_get(None).await.unwrap()
        else {
            panic!("expected Standalone");
        };
        assert!(priming.is_some());
    }

    #[tokio::test]
    async fn disposed_session_refuses_new_operations() {
        let (session, _inbox) = session(false, false, never_resumable);
        session.dispose().await;
        assert!(session.is_disposed());
        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "ping".into(),
            params: None,
        });
        assert!(matches!(
            session.handle_post(notification).await,
            Err(SessionError::Disposed)
        ));
        session.dispose().await; // idempotent
    }
}
