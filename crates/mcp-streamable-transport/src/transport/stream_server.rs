//! Line-delimited JSON-RPC over a raw duplex byte stream, with no sessions,
//! no SSE framing, and no event store. spec.md C7 — the "direct" transport
//! a local subprocess or a single long-lived TCP/unix-socket peer uses
//! instead of the HTTP surface.
//!
//! Grounded on the teacher's general shape for a byte-stream transport:
//! one task reads lines and decodes them, a single send-side mutex
//! serializes writes so concurrent `send` calls never interleave a partial
//! line (mirrors how `SseWriter` serializes concurrent senders onto one
//! queue, just without SSE framing or persistence).

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::model::JsonRpcMessage;
use crate::transport::context::MessageContext;
use crate::transport::session::InboxItem;

#[derive(Debug, Error)]
pub enum StreamServerError {
    #[error("line too long or malformed: {0}")]
    Framing(#[from] LinesCodecError),
    #[error("invalid JSON-RPC message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("the peer closed the stream")]
    Closed,
}

/// A duplex JSON-RPC peer over one `AsyncRead + AsyncWrite` pair. spec.md
/// C7: no correlation, no resumability, no standalone stream — every
/// decoded line is handed to the dispatcher with a [`MessageContext`] whose
/// `reply` writes straight back onto this same connection.
pub struct StreamServerTransport {
    write_half: AsyncMutex<FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>>,
    disposal_token: CancellationToken,
}

impl StreamServerTransport {
    /// Splits `read`/`write` into a driver task (which decodes lines into
    /// `InboxItem`s) and a handle used to send outbound messages. The
    /// returned receiver yields items for as long as the peer stays
    /// connected; the caller is expected to drain it the same way it would
    /// an HTTP session's inbox (spec.md §9 "dispatcher is an external
    /// collaborator").
    pub fn spawn(
        read: impl AsyncRead + Send + Unpin + 'static,
        write: impl AsyncWrite + Send + Unpin + 'static,
    ) -> (Arc<Self>, Receiver<InboxItem>) {
        let transport = Arc::new(Self {
            write_half: AsyncMutex::new(FramedWrite::new(Box::new(write), LinesCodec::new())),
            disposal_token: CancellationToken::new(),
        });
        let (tx, rx) = mpsc::channel(64);
        let driver = transport.clone();
        tokio::spawn(async move {
            driver.run_read_loop(read, tx).await;
        });
        (transport, rx)
    }

    async fn run_read_loop(
        self: Arc<Self>,
        read: impl AsyncRead + Send + Unpin + 'static,
        tx: Sender<InboxItem>,
    ) {
        let mut lines = FramedRead::new(read, LinesCodec::new());
        loop {
            let line = tokio::select! {
                _ = self.disposal_token.cancelled() => break,
                line = lines.next() => line,
            };
            let line = match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "closing stream-server connection on framing error");
                    break;
                }
                None => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            let message: JsonRpcMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed JSON-RPC line");
                    continue;
                }
            };

            let transport = self.clone();
            let reply: crate::transport::context::ReplyCallback = Arc::new(move |reply_message| {
                let transport = transport.clone();
                Box::pin(async move { transport.send(reply_message).await.is_ok() })
            });
            let ctx = MessageContext::new().with_reply(reply);
            if tx.send((message, ctx)).await.is_err() {
                break;
            }
        }
    }

    /// Writes one message as a single line. Calls serialize via the shared
    /// mutex so concurrent callers never interleave partial lines.
    pub async fn send(&self, message: JsonRpcMessage) -> Result<(), StreamServerError> {
        let line = serde_json::to_string(&message)?;
        let mut write_half = self.write_half.lock().await;
        write_half.send(line).await?;
        Ok(())
    }

    /// spec.md §4.6: cancels the read loop and closes the write half.
    /// Idempotent — cancelling an already-cancelled token and closing an
    /// already-closed sink are both no-ops.
    pub async fn dispose(&self) {
        self.disposal_token.cancel();
        let mut write_half = self.write_half.lock().await;
        let _ = write_half.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JsonRpcNotification, JsonRpcVersion2_0};
    use tokio::io::duplex;

    #[tokio::test]
    async fn decodes_one_line_per_message_and_replies_on_the_same_connection() {
        let (client, server) = duplex(4096);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let (_transport, mut inbox) = StreamServerTransport::spawn(server_read, server_write);

        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "ping".into(),
            params: None,
        });
        let mut line = serde_json::to_string(&notification).unwrap();
        line.push('\n');
        use tokio::io::AsyncWriteExt;
        client_write.write_all(line.as_bytes()).await.unwrap();

        let (received, ctx) = inbox.recv().await.expect("line decoded into inbox item");
        assert!(matches!(received, JsonRpcMessage::Notification(_)));

        let pong = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "pong".into(),
            params: None,
        });
        assert!(ctx.reply(pong).await);

        let mut client_reader = FramedRead::new(client_read, LinesCodec::new());
        let echoed = client_reader.next().await.unwrap().unwrap();
        assert!(echoed.contains("\"pong\""));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (client, server) = duplex(4096);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let (_transport, mut inbox) = StreamServerTransport::spawn(server_read, server_write);
        drop(client_read);

        use tokio::io::AsyncWriteExt;
        client_write.write_all(b"\n\n").await.unwrap();
        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: "ping".into(),
            params: None,
        });
        let mut line = serde_json::to_string(&notification).unwrap();
        line.push('\n');
        client_write.write_all(line.as_bytes()).await.unwrap();
        drop(client_write);

        let (received, _ctx) = inbox.recv().await.expect("blank lines skipped, real one decoded");
        assert!(matches!(received, JsonRpcMessage::Notification(_)));
    }

    #[tokio::test]
    async fn dispose_stops_the_read_loop_and_closes_the_inbox() {
        let (client, server) = duplex(4096);
        let (_client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let (transport, mut inbox) = StreamServerTransport::spawn(server_read, server_write);

        transport.dispose().await;

        assert!(inbox.recv().await.is_none());
        drop(client_write);
    }
}
