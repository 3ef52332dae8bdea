//! Axum adapter. spec.md C6, grounded on the teacher's (absent from the
//! retrieved pack, but mirrored from its actix-web sibling)
//! `streamable_http_server/axum.rs` route shape: POST/GET/DELETE on one
//! path, `Mcp-Session-Id` correlating requests to a session.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;

use super::{
    Config, Dispatch, EVENT_STREAM_MIME_TYPE, HEADER_LAST_EVENT_ID, HEADER_SESSION_ID,
    HEADER_X_ACCEL_BUFFERING, JSON_MIME_TYPE,
};
use crate::model::JsonRpcMessage;
use crate::transport::session::{GetOutcome, PostOutcome, SessionError, SessionManager};

/// Ties a [`SessionManager`] and a message [`Dispatch`] to the HTTP routes
/// spec.md C6 describes. Analogous to the teacher's `StreamableHttpService`,
/// minus the `service_factory` (the JSON-RPC method dispatcher lives
/// entirely outside this crate; see spec.md §1 "Out of scope").
pub struct StreamableHttpService<M: SessionManager> {
    pub config: Config,
    session_manager: Arc<M>,
    dispatch: Dispatch,
}

impl<M: SessionManager + 'static> StreamableHttpService<M> {
    pub fn new(session_manager: Arc<M>, dispatch: Dispatch, config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            session_manager,
            dispatch,
        })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(
                "/",
                get(Self::handle_get)
                    .post(Self::handle_post)
                    .delete(Self::handle_delete),
            )
            .with_state(self)
    }

    fn spawn_dispatch_loop(&self, mut inbox: tokio::sync::mpsc::Receiver<crate::transport::session::InboxItem>) {
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            while let Some(item) = inbox.recv().await {
                dispatch(item).await;
            }
        });
    }

    async fn handle_get(
        State(service): State<Arc<Self>>,
        headers: HeaderMap,
    ) -> Response {
        let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
        if !accept.is_some_and(|h| h.contains(EVENT_STREAM_MIME_TYPE)) {
            return (
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable: Client must accept text/event-stream",
            )
                .into_response();
        }

        if !service.config.stateful_mode {
            return (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed: stateless mode")
                .into_response();
        }

        let Some(session_id) = session_id_header(&headers) else {
            return (StatusCode::UNAUTHORIZED, "Unauthorized: Session ID is required")
                .into_response();
        };

        let Some(session) = service.session_manager.get_session(&session_id).await else {
            return (StatusCode::NOT_FOUND, "Not Found: unknown session").into_response();
        };

        let last_event_id = headers
            .get(HEADER_LAST_EVENT_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        tracing::debug!(%session_id, resuming = last_event_id.is_some(), "GET request for SSE stream");

        let outcome = match session.handle_get(last_event_id).await {
            Ok(outcome) => outcome,
            Err(SessionError::SecondGetRejected) => {
                return (StatusCode::CONFLICT, "Conflict: a GET stream is already open")
                    .into_response();
            }
            Err(SessionError::ResumptionMiss) => {
                return (StatusCode::NOT_FOUND, "Not Found: unknown Last-Event-ID").into_response();
            }
            Err(SessionError::StatelessViolation) => {
                return (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed: stateless mode")
                    .into_response();
            }
            Err(e) => return internal_error(e),
        };

        let keep_alive = service.config.sse_keep_alive;
        let session_for_close = session.clone();

        match outcome {
            GetOutcome::Standalone {
                mut replay,
                writer,
                priming,
            } => {
                let stream = async_stream::stream! {
                    let _guard = GetSlotGuard::new(session_for_close);
                    if let Some(item) = priming {
                        yield Ok::<_, std::convert::Infallible>(item.render().into_bytes());
                    }
                    if let Some(reader) = replay.as_mut() {
                        let (items, _status) = reader.drain_available();
                        for item in items {
                            yield Ok(item.render().into_bytes());
                        }
                    }
                    let mut keep_alive_timer = keep_alive.map(tokio::time::interval);
                    loop {
                        tokio::select! {
                            maybe_item = writer.recv() => {
                                match maybe_item {
                                    Some(item) => yield Ok(item.render().into_bytes()),
                                    None => break,
                                }
                            }
                            _ = tick(&mut keep_alive_timer) => {
                                yield Ok(b":ping\n\n".to_vec());
                            }
                        }
                    }
                };
                sse_response(stream, None)
            }
            GetOutcome::ReplayOnly { mut replay } => {
                let stream = async_stream::stream! {
                    let (items, _status) = replay.drain_available();
                    for item in items {
                        yield Ok::<_, std::convert::Infallible>(item.render().into_bytes());
                    }
                };
                sse_response(stream, None)
            }
        }
    }

    async fn handle_post(
        State(service): State<Arc<Self>>,
        headers: HeaderMap,
        request: Request,
    ) -> Response {
        let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
        if !accept.is_some_and(|h| h.contains(JSON_MIME_TYPE) && h.contains(EVENT_STREAM_MIME_TYPE))
        {
            return (
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable: Client must accept both application/json and text/event-stream",
            )
                .into_response();
        }
        let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
        if !content_type.is_some_and(|h| h.starts_with(JSON_MIME_TYPE)) {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Unsupported Media Type: Content-Type must be application/json",
            )
                .into_response();
        }

        let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
            Ok(b) => b,
            Err(_) => return (StatusCode::BAD_REQUEST, "Bad Request: could not read body").into_response(),
        };
        let message: JsonRpcMessage = match serde_json::from_slice(&body) {
            Ok(m) => m,
            Err(e) => return (StatusCode::BAD_REQUEST, format!("Bad Request: {e}")).into_response(),
        };

        if !service.config.stateful_mode {
            return service.handle_stateless_post(message).await;
        }

        let existing_id = session_id_header(&headers);
        let (session, new_session_id) = match existing_id {
            Some(id) => {
                let Some(session) = service.session_manager.get_session(&id).await else {
                    return (StatusCode::NOT_FOUND, "Not Found: unknown session").into_response();
                };
                (session, None)
            }
            None => {
                if !message.is_initialize_request() {
                    return (StatusCode::BAD_REQUEST, "Bad Request: expected initialize request")
                        .into_response();
                }
                let (session, inbox) = service.session_manager.create_session().await;
                service.spawn_dispatch_loop(inbox);
                let id = session.id().clone();
                tracing::info!(session_id = %id, "created new session");
                (session, Some(id))
            }
        };

        if let JsonRpcMessage::Request(r) = &message
            && r.method == "initialize"
        {
            let protocol_version = r
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or("2025-11-25");
            session.on_initialize_received(protocol_version).await;
        }

        let outcome = match session.handle_post(message).await {
            Ok(outcome) => outcome,
            Err(SessionError::Disposed) => {
                return (StatusCode::GONE, "Gone: session disposed").into_response();
            }
            Err(e) => return internal_error(e),
        };

        match outcome {
            PostOutcome::Accepted => {
                let mut resp = StatusCode::ACCEPTED.into_response();
                if let Some(id) = &new_session_id {
                    insert_session_header(resp.headers_mut(), id);
                }
                resp
            }
            PostOutcome::Streaming { post, mut rx } => {
                let keep_alive = service.config.sse_keep_alive;
                let stream = async_stream::stream! {
                    let _post = post;
                    let mut keep_alive_timer = keep_alive.map(tokio::time::interval);
                    loop {
                        tokio::select! {
                            maybe_item = rx.recv() => {
                                match maybe_item {
                                    Some(item) => yield Ok::<_, std::convert::Infallible>(item.render().into_bytes()),
                                    None => break,
                                }
                            }
                            _ = tick(&mut keep_alive_timer) => {
                                yield Ok(b":ping\n\n".to_vec());
                            }
                        }
                    }
                };
                sse_response(stream, new_session_id.as_deref())
            }
        }
    }

    async fn handle_stateless_post(self: &Arc<Self>, message: JsonRpcMessage) -> Response {
        let (session, mut inbox) = self.session_manager.create_session().await;
        let dispatch = self.dispatch.clone();
        let outcome = match session.handle_post(message).await {
            Ok(outcome) => outcome,
            Err(e) => return internal_error(e),
        };
        tokio::spawn(async move {
            if let Some(item) = inbox.recv().await {
                dispatch(item).await;
            }
        });
        match outcome {
            PostOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
            PostOutcome::Streaming { post, mut rx } => {
                let stream = async_stream::stream! {
                    let _post = post;
                    while let Some(item) = rx.recv().await {
                        yield Ok::<_, std::convert::Infallible>(item.render().into_bytes());
                    }
                };
                sse_response(stream, None)
            }
        }
    }

    async fn handle_delete(State(service): State<Arc<Self>>, headers: HeaderMap) -> Response {
        if !service.config.stateful_mode {
            return (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed: stateless mode")
                .into_response();
        }
        let Some(session_id) = session_id_header(&headers) else {
            return (StatusCode::UNAUTHORIZED, "Unauthorized: Session ID is required")
                .into_response();
        };
        service.session_manager.terminate_session(&session_id).await;
        tracing::info!(%session_id, "session terminated");
        StatusCode::NO_CONTENT.into_response()
    }
}

/// Fires the configured keep-alive interval, or never if disabled.
async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Releases a session's standalone-GET slot when the response body ends,
/// for any reason: normal completion, client disconnect, or panic unwind.
struct GetSlotGuard(Arc<crate::transport::session::SessionTransport>);

impl GetSlotGuard {
    fn new(session: Arc<crate::transport::session::SessionTransport>) -> Self {
        Self(session)
    }
}

impl Drop for GetSlotGuard {
    fn drop(&mut self) {
        let session = self.0.clone();
        tokio::spawn(async move { session.mark_get_closed().await });
    }
}

fn session_id_header(headers: &HeaderMap) -> Option<Arc<str>> {
    headers
        .get(HEADER_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(Arc::from)
}

fn insert_session_header(headers: &mut HeaderMap, id: &str) {
    if let Ok(value) = HeaderValue::from_str(id) {
        headers.insert(HEADER_SESSION_ID, value);
    }
}

fn sse_response<S>(stream: S, new_session_id: Option<&str>) -> Response
where
    S: futures::Stream<Item = Result<Vec<u8>, std::convert::Infallible>> + Send + 'static,
{
    let body = Body::from_stream(stream.map(|r| r.map(axum::body::Bytes::from)));
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, EVENT_STREAM_MIME_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(HEADER_X_ACCEL_BUFFERING, "no");
    if let Some(id) = new_session_id {
        response = response.header(HEADER_SESSION_ID, id);
    }
    response.body(body).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to build SSE response").into_response()
    })
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::error!(%err, "internal error handling streamable HTTP request");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}
