//! actix-web adapter, grounded directly on the teacher's
//! `streamable_http_server/actix_web.rs`: same route shape
//! (`web::scope("/").route(...)`), same `async_stream::stream! { ... }`
//! keep-alive `tokio::select!` loop, same header/status vocabulary.

use std::pin::Pin;
use std::sync::Arc;

use actix_web::{
    HttpRequest, HttpResponse, Result as ActixResult,
    error::InternalError,
    http::{StatusCode, header},
    middleware,
    web::{self, Bytes, Data},
};

use super::{
    Config, Dispatch, EVENT_STREAM_MIME_TYPE, HEADER_LAST_EVENT_ID, HEADER_SESSION_ID,
    HEADER_X_ACCEL_BUFFERING, JSON_MIME_TYPE,
};
use crate::model::JsonRpcMessage;
use crate::transport::session::{GetOutcome, PostOutcome, SessionError, SessionManager};

pub struct StreamableHttpService<M: SessionManager> {
    pub config: Config,
    session_manager: Arc<M>,
    dispatch: Dispatch,
}

impl<M: SessionManager + 'static> StreamableHttpService<M> {
    pub fn new(session_manager: Arc<M>, dispatch: Dispatch, config: Config) -> Self {
        Self {
            config,
            session_manager,
            dispatch,
        }
    }

    /// Configure actix-web routes for the streamable HTTP server.
    pub fn configure(service: Arc<Self>) -> impl FnOnce(&mut web::ServiceConfig) {
        move |cfg: &mut web::ServiceConfig| {
            cfg.service(
                web::scope("/")
                    .app_data(Data::new(service.clone()))
                    .wrap(middleware::NormalizePath::trim())
                    .route("", web::get().to(Self::handle_get))
                    .route("", web::post().to(Self::handle_post))
                    .route("", web::delete().to(Self::handle_delete)),
            );
        }
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
        req: HttpRequest,
        service: Data<Arc<StreamableHttpService<M>>>,
    ) -> ActixResult<HttpResponse> {
        let accept = req.headers().get(header::ACCEPT).and_then(|h| h.to_str().ok());
        if !accept.is_some_and(|h| h.contains(EVENT_STREAM_MIME_TYPE)) {
            return Ok(HttpResponse::NotAcceptable()
                .body("Not Acceptable: Client must accept text/event-stream"));
        }

        if !service.config.stateful_mode {
            return Ok(HttpResponse::MethodNotAllowed().body("Method Not Allowed: stateless mode"));
        }

        let Some(session_id) = session_id_header(&req) else {
            return Ok(HttpResponse::Unauthorized().body("Unauthorized: Session ID is required"));
        };

        let Some(session) = service.session_manager.get_session(&session_id).await else {
            return Ok(HttpResponse::NotFound().body("Not Found: unknown session"));
        };

        let last_event_id = req
            .headers()
            .get(HEADER_LAST_EVENT_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        tracing::debug!(%session_id, resuming = last_event_id.is_some(), "GET request for SSE stream");

        let outcome = match session.handle_get(last_event_id).await {
            Ok(outcome) => outcome,
            Err(SessionError::SecondGetRejected) => {
                return Ok(HttpResponse::Conflict().body("Conflict: a GET stream is already open"));
            }
            Err(SessionError::ResumptionMiss) => {
                return Ok(HttpResponse::NotFound().body("Not Found: unknown Last-Event-ID"));
            }
            Err(SessionError::StatelessViolation) => {
                return Ok(HttpResponse::MethodNotAllowed().body("Method Not Allowed: stateless mode"));
            }
            Err(e) => return Err(InternalError::new(e, StatusCode::INTERNAL_SERVER_ERROR).into()),
        };

        let keep_alive = service.config.sse_keep_alive;
        let session_for_close = session.clone();

        let body_stream: Pin<Box<dyn futures::Stream<Item = Result<Bytes, actix_web::Error>>>> = match outcome {
            GetOutcome::Standalone {
                mut replay,
                writer,
                priming,
            } => Box::pin(async_stream::stream! {
                    let _guard = GetSlotGuard::new(session_for_close);
                    if let Some(item) = priming {
                        yield Ok::<_, actix_web::Error>(Bytes::from(item.render()));
                    }
                    if let Some(reader) = replay.as_mut() {
                        let (items, _status) = reader.drain_available();
                        for item in items {
                            yield Ok(Bytes::from(item.render()));
                        }
                    }
                    let mut keep_alive_timer = keep_alive.map(tokio::time::interval);
                    loop {
                        tokio::select! {
                            maybe_item = writer.recv() => {
                                match maybe_item {
                                    Some(item) => yield Ok(Bytes::from(item.render())),
                                    None => break,
                                }
                            }
                            _ = tick(&mut keep_alive_timer) => {
                                yield Ok(Bytes::from(":ping\n\n"));
                            }
                        }
                    }
            }),
            GetOutcome::ReplayOnly { mut replay } => Box::pin(async_stream::stream! {
                let (items, _status) = replay.drain_available();
                for item in items {
                    yield Ok::<_, actix_web::Error>(Bytes::from(item.render()));
                }
            }),
        };

        Ok(HttpResponse::Ok()
            .content_type(EVENT_STREAM_MIME_TYPE)
            .append_header((header::CACHE_CONTROL, "no-cache"))
            .append_header((HEADER_X_ACCEL_BUFFERING, "no"))
            .streaming(body_stream))
    }

    async fn handle_post(
        req: HttpRequest,
        body: Bytes,
        service: Data<Arc<StreamableHttpService<M>>>,
    ) -> ActixResult<HttpResponse> {
        let accept = req.headers().get(header::ACCEPT).and_then(|h| h.to_str().ok());
        if !accept.is_some_and(|h| h.contains(JSON_MIME_TYPE) && h.contains(EVENT_STREAM_MIME_TYPE)) {
            return Ok(HttpResponse::NotAcceptable().body(
                "Not Acceptable: Client must accept both application/json and text/event-stream",
            ));
        }
        let content_type = req.headers().get(header::CONTENT_TYPE).and_then(|h| h.to_str().ok());
        if !content_type.is_some_and(|h| h.starts_with(JSON_MIME_TYPE)) {
            return Ok(HttpResponse::UnsupportedMediaType()
                .body("Unsupported Media Type: Content-Type must be application/json"));
        }

        let message: JsonRpcMessage = serde_json::from_slice(&body)
            .map_err(|e| InternalError::new(e, StatusCode::BAD_REQUEST))?;

        tracing::debug!(?message, "POST request with message");

        if !service.config.stateful_mode {
            return service.handle_stateless_post(message).await;
        }

        let existing_id = session_id_header(&req);
        let (session, new_session_id) = match existing_id {
            Some(id) => {
                let Some(session) = service.session_manager.get_session(&id).await else {
                    return Ok(HttpResponse::NotFound().body("Not Found: unknown session"));
                };
                (session, None)
            }
            None => {
                if !message.is_initialize_request() {
                    return Ok(HttpResponse::BadRequest().body("Bad Request: expected initialize request"));
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

        let outcome = session
            .handle_post(message)
            .await
            .map_err(|e| InternalError::new(e, StatusCode::INTERNAL_SERVER_ERROR))?;

        match outcome {
            PostOutcome::Accepted => {
                let mut response = HttpResponse::Accepted();
                if let Some(id) = &new_session_id {
                    response.append_header((HEADER_SESSION_ID, id.as_ref()));
                }
                Ok(response.finish())
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
                                    Some(item) => yield Ok::<_, actix_web::Error>(Bytes::from(item.render())),
                                    None => break,
                                }
                            }
                            _ = tick(&mut keep_alive_timer) => {
                                yield Ok(Bytes::from(":ping\n\n"));
                            }
                        }
                    }
                };
                let mut response = HttpResponse::Ok();
                response
                    .content_type(EVENT_STREAM_MIME_TYPE)
                    .append_header((header::CACHE_CONTROL, "no-cache"))
                    .append_header((HEADER_X_ACCEL_BUFFERING, "no"));
                if let Some(id) = &new_session_id {
                    response.append_header((HEADER_SESSION_ID, id.as_ref()));
                }
                Ok(response.streaming(stream))
            }
        }
    }

    async fn handle_stateless_post(
        self: &Arc<Self>,
        message: JsonRpcMessage,
    ) -> ActixResult<HttpResponse> {
        let (session, mut inbox) = self.session_manager.create_session().await;
        let dispatch = self.dispatch.clone();
        let outcome = session
            .handle_post(message)
            .await
            .map_err(|e| InternalError::new(e, StatusCode::INTERNAL_SERVER_ERROR))?;
        tokio::spawn(async move {
            if let Some(item) = inbox.recv().await {
                dispatch(item).await;
            }
        });
        match outcome {
            PostOutcome::Accepted => Ok(HttpResponse::Accepted().finish()),
            PostOutcome::Streaming { post, mut rx } => {
                let stream = async_stream::stream! {
                    let _post = post;
                    while let Some(item) = rx.recv().await {
                        yield Ok::<_, actix_web::Error>(Bytes::from(item.render()));
                    }
                };
                Ok(HttpResponse::Ok()
                    .content_type(EVENT_STREAM_MIME_TYPE)
                    .append_header((header::CACHE_CONTROL, "no-cache"))
                    .append_header((HEADER_X_ACCEL_BUFFERING, "no"))
                    .streaming(stream))
            }
        }
    }

    async fn handle_delete(
        req: HttpRequest,
        service: Data<Arc<StreamableHttpService<M>>>,
    ) -> ActixResult<HttpResponse> {
        if !service.config.stateful_mode {
            return Ok(HttpResponse::MethodNotAllowed().body("Method Not Allowed: stateless mode"));
        }
        let Some(session_id) = session_id_header(&req) else {
            return Ok(HttpResponse::Unauthorized().body("Unauthorized: Session ID is required"));
        };
        service.session_manager.terminate_session(&session_id).await;
        tracing::info!(%session_id, "session terminated");
        Ok(HttpResponse::NoContent().finish())
    }
}

async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

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

fn session_id_header(req: &HttpRequest) -> Option<Arc<str>> {
    req.headers()
        .get(HEADER_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(Arc::from)
}
