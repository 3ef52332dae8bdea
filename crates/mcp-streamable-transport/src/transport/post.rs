//! One [`PostTransport`] per POST request that carries a JSON-RPC request.
//! spec.md C4.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::Receiver;

use crate::model::{JsonRpcMessage, RequestId};
use crate::transport::event_store::EventStreamWriter;
use crate::transport::sse::{SseItem, SseWriter};

/// Why a [`PostTransport::run`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCompletion {
    /// The correlated response/error arrived and was written.
    Correlated,
    /// Cancelled before the correlated response arrived (disposal or the
    /// HTTP request's own cancellation).
    Cancelled,
}

/// The per-POST correlator. Forwards the inbound message to the session's
/// inbox, then relays outbound messages addressed to it (via
/// [`MessageContext::reply`](crate::transport::context::MessageContext::reply))
/// until the response matching `pending_request_id` appears.
pub struct PostTransport {
    stream_id: String,
    pending_request_id: Option<RequestId>,
    writer: SseWriter,
    /// Set once the correlated response has been written; after that,
    /// `send_message` falls back to the session's standalone writer
    /// (spec.md §4.3: late messages must not be lost).
    finished: AtomicBool,
    stateless: bool,
}

impl PostTransport {
    /// `stream_id` is typically the JSON-RPC request's string id (spec.md
    /// §3/§9), or a generated opaque id when the POST carries no request
    /// with a usable id.
    pub fn new(stream_id: String, pending_request_id: Option<RequestId>, stateless: bool) -> (Arc<Self>, Receiver<SseItem>) {
        let (writer, rx) = SseWriter::bounded(8);
        (
            Arc::new(Self {
                stream_id,
                pending_request_id,
                writer,
                finished: AtomicBool::new(false),
                stateless,
            }),
            rx,
        )
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn pending_request_id(&self) -> Option<&RequestId> {
        self.pending_request_id.as_ref()
    }

    /// `true` once the body has no more writes coming (spec.md §4.3
    /// `StopOnFinalResponse`).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Attempt to write `message` on this POST's own SSE body.
    ///
    /// Returns `Ok(true)` if written here, `Ok(false)` if this transport is
    /// already finished and the caller should fall back to the session's
    /// standalone writer, and `Err` for a stateless-mode violation (spec.md
    /// §4.3: stateless mode refuses server→client requests, since the
    /// response might land on a different process).
    pub async fn send_message(
        &self,
        message: JsonRpcMessage,
        event_stream_writer: Option<&EventStreamWriter>,
    ) -> Result<bool, PostTransportError> {
        if self.stateless && matches!(message, JsonRpcMessage::Request(_)) {
            return Err(PostTransportError::UnsupportedInStatelessMode);
        }
        if self.is_finished() {
            return Ok(false);
        }
        let is_final = message.is_final_response()
            && message.correlation_id() == self.pending_request_id.as_ref();

        let item = SseItem::message(message);
        let sent = self
            .writer
            .send_message(item, event_stream_writer)
            .await
            .map_err(PostTransportError::EventStore)?;

        if is_final {
            self.finished.store(true, Ordering::SeqCst);
            self.writer.complete();
        }
        Ok(sent)
    }

    /// Whether `self.pending_request_id` is absent — per spec.md §3, such a
    /// POST writes no body and the HTTP caller returns `202 Accepted`.
    pub fn is_notification_only(&self) -> bool {
        self.pending_request_id.is_none()
    }

    pub fn writer(&self) -> &SseWriter {
        &self.writer
    }

    /// Forces completion, e.g. on cancellation or session disposal.
    pub fn cancel(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.writer.complete();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PostTransportError {
    #[error("server-to-client requests are not supported in stateless mode")]
    UnsupportedInStatelessMode,
    #[error(transparent)]
    EventStore(#[from] crate::transport::event_store::EventStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JsonRpcResponse, JsonRpcVersion2_0};
    use serde_json::json;

    #[tokio::test]
    async fn completes_exactly_on_correlated_response() {
        let (post, mut rx) = PostTransport::new("1".into(), Some(RequestId::Number(1)), false);
        assert!(!post.is_finished());
        let response = JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JsonRpcVersion2_0,
            id: RequestId::Number(1),
            result: json!({}),
        });
        let sent = post.send_message(response, None).await.unwrap();
        assert!(sent);
        assert!(post.is_finished());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn late_message_after_finish_reports_not_sent_here() {
        let (post, _rx) = PostTransport::new("1".into(), Some(RequestId::Number(1)), false);
        post.cancel();
        let notification = JsonRpcMessage::Notification(crate::model::JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "notifications/progress".into(),
            params: None,
        });
        let sent = post.send_message(notification, None).await.unwrap();
        assert!(!sent, "caller must fall back to the standalone writer");
    }

    #[tokio::test]
    async fn stateless_mode_refuses_server_to_client_requests() {
        let (post, _rx) = PostTransport::new("1".into(), Some(RequestId::Number(1)), true);
        let request = JsonRpcMessage::Request(crate::model::JsonRpcRequest {
            jsonrpc: JsonRpcVersion2_0,
            id: RequestId::Number(99),
            method: "sampling/createMessage".into(),
            params: None,
        });
        let err = post.send_message(request, None).await.unwrap_err();
        assert!(matches!(err, PostTransportError::UnsupportedInStatelessMode));
    }

    #[test]
    fn notification_only_post_has_no_pending_id() {
        let (post, _rx) = PostTransport::new("gen-1".into(), None, false);
        assert!(post.is_notification_only());
    }
}
