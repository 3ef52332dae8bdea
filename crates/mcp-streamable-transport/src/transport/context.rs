//! Per-message side channels threaded alongside a [`JsonRpcMessage`] on its
//! way into the dispatcher. spec.md C8.
//!
//! Modeled as function values attached to the context, not as methods on a
//! specific transport type (spec.md §9 "Callback-with-context"): a `None`
//! callback means the owning transport doesn't support that operation, and
//! calling a callback is always safe — it is a no-op if the resource it
//! would close is already gone.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::model::JsonRpcMessage;

/// An authenticated caller identity, if the HTTP layer attached one. The
/// auth middleware that produces these lives outside this crate (spec.md
/// §1 "Out of scope"); this is just the shape a principal travels in.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub subject: Option<String>,
    pub claims: serde_json::Value,
}

/// Ambient context a dispatcher task should resume under, if the host
/// process has such a concept (spec.md §4.7 / §9 "Execution-context flow").
/// Transports that don't support this just leave it `None`; the flag and
/// the value travel together so a caller can tell "unsupported" apart from
/// "supported but nothing captured".
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub flow: bool,
    pub captured: Option<Arc<dyn std::any::Any + Send + Sync>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("flow", &self.flow)
            .field("captured", &self.captured.is_some())
            .finish()
    }
}

type CloseCallback = Arc<dyn Fn() + Send + Sync>;
/// `relatedTransport` (spec.md §4.3): routes an outbound message back to
/// whichever transport should carry it — the PostTransport's SSE body if
/// still open, falling back to the session's standalone writer otherwise.
/// Returns whether the message was (locally) delivered.
pub(crate) type ReplyCallback = Arc<dyn Fn(JsonRpcMessage) -> BoxFuture<'static, bool> + Send + Sync>;

/// Immutable, per-message context handed to the dispatcher alongside the
/// message itself.
#[derive(Clone)]
pub struct MessageContext {
    pub principal: Option<Principal>,
    pub execution_context: ExecutionContext,
    /// Closes the PostTransport's own SSE body (the client reconnects with
    /// `Last-Event-ID`, resuming via [`EventStreamReader`](crate::transport::event_store::EventStreamReader)).
    /// `None` on transports without a correlated response body (e.g. C7).
    close_sse_stream: Option<CloseCallback>,
    /// Closes the session's standalone GET SSE stream.
    close_standalone_sse_stream: Option<CloseCallback>,
    reply: Option<ReplyCallback>,
}

impl MessageContext {
    pub fn new() -> Self {
        Self {
            principal: None,
            execution_context: ExecutionContext::default(),
            close_sse_stream: None,
            close_standalone_sse_stream: None,
            reply: None,
        }
    }

    pub fn with_reply(mut self, callback: ReplyCallback) -> Self {
        self.reply = Some(callback);
        self
    }

    /// Send an outbound message via this message's `relatedTransport`.
    /// Returns `false` if there is no related transport (e.g. a message
    /// read off [`StreamServerTransport`](crate::transport::stream_server::StreamServerTransport),
    /// which has no per-message correlation) or it is disposed.
    pub async fn reply(&self, message: JsonRpcMessage) -> bool {
        match &self.reply {
            Some(cb) => cb(message).await,
            None => false,
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_execution_context(mut self, execution_context: ExecutionContext) -> Self {
        self.execution_context = execution_context;
        self
    }

    pub fn with_close_sse_stream(mut self, callback: CloseCallback) -> Self {
        self.close_sse_stream = Some(callback);
        self
    }

    pub fn with_close_standalone_sse_stream(mut self, callback: CloseCallback) -> Self {
        self.close_standalone_sse_stream = Some(callback);
        self
    }

    /// Closes the current PostTransport's SSE body. A no-op if this
    /// transport doesn't support it or the body is already closed.
    pub fn close_sse_stream(&self) {
        if let Some(cb) = &self.close_sse_stream {
            cb();
        }
    }

    /// Closes the session's standalone GET SSE stream. A no-op if this
    /// transport doesn't support it or it's already closed.
    pub fn close_standalone_sse_stream(&self) {
        if let Some(cb) = &self.close_standalone_sse_stream {
            cb();
        }
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("principal", &self.principal.is_some())
            .field("execution_context", &self.execution_context)
            .field("close_sse_stream", &self.close_sse_stream.is_some())
            .field(
                "close_standalone_sse_stream",
                &self.close_standalone_sse_stream.is_some(),
            )
            .field("reply", &self.reply.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn missing_callback_is_a_safe_no_op() {
        let ctx = MessageContext::new();
        ctx.close_sse_stream();
        ctx.close_standalone_sse_stream();
    }

    #[test]
    fn present_callback_is_invoked() {
        let called = Arc::new(AtomicBool::new(false));
        let called2 = called.clone();
        let ctx = MessageContext::new()
            .with_close_sse_stream(Arc::new(move || called2.store(true, Ordering::SeqCst)));
        ctx.close_sse_stream();
        assert!(called.load(Ordering::SeqCst));
    }
}
