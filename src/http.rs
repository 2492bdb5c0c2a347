//! Streamable HTTP transport.
//!
//! `POST /` carries client messages and returns the reply in the body.
//! `GET /` opens the session's server-push stream as SSE. `DELETE /` ends the
//! session. Every request after initialization names its session in the
//! `mcp-session-id` header.

use std::{convert::Infallible, future::Future, panic::AssertUnwindSafe, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures::{channel::mpsc, FutureExt, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::Dispatcher,
    error::{Error, Result},
    notify,
    schema::{
        ErrorObject, JSONRPCError, JSONRPCMessage, RequestId, INTERNAL_ERROR, JSONRPC_VERSION,
        PARSE_ERROR, SERVER_ERROR, SUPPORTED_PROTOCOL_VERSIONS,
    },
    session::{Session, SessionManager},
};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const BAD_REQUEST_MESSAGE: &str = "Bad Request: invalid session ID or method.";
const UNSUPPORTED_VERSION_MESSAGE: &str = "Bad Request: unsupported protocol version.";
const STREAM_CONFLICT_MESSAGE: &str = "Conflict: session already has an open stream.";
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const PARSE_ERROR_MESSAGE: &str = "Parse error";

#[derive(Clone)]
struct HttpServerState {
    sessions: SessionManager,
    dispatcher: Dispatcher,
    stream_tick: Duration,
}

/// Build the MCP router over `sessions`.
pub fn router(sessions: SessionManager, dispatcher: Dispatcher, stream_tick: Duration) -> Router {
    let state = HttpServerState {
        sessions,
        dispatcher,
        stream_tick,
    };
    Router::new()
        .route("/", post(handle_post).get(handle_get).delete(handle_delete))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds a TCP listener and serves a router on it.
pub struct HttpServerTransport {
    pub bind_addr: String,
}

impl HttpServerTransport {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }

    /// Bind and start serving. Afterwards `bind_addr` holds the real address,
    /// which matters when port 0 was requested.
    pub async fn start(
        &mut self,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<Result<()>>> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| {
                Error::Transport(format!("Failed to bind to {}: {}", self.bind_addr, e))
            })?;
        self.bind_addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("Failed to get local address: {e}")))?
            .to_string();

        let bind_addr = self.bind_addr.clone();
        info!("HTTP server listening on {}", bind_addr);
        Ok(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                })
                .await
                .map_err(|e| Error::Transport(format!("Server error: {e}")))?;
            info!("HTTP server on {} stopped", bind_addr);
            Ok(())
        }))
    }
}

fn error_response(status: StatusCode, code: i32, message: &str) -> Response {
    let body = JSONRPCError {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: RequestId::generate(),
        error: ErrorObject {
            code,
            message: message.to_string(),
            data: None,
        },
    };
    (status, Json(body)).into_response()
}

fn bad_request() -> Response {
    error_response(StatusCode::BAD_REQUEST, SERVER_ERROR, BAD_REQUEST_MESSAGE)
}

fn with_session_header(mut response: Response, session: &Session) -> Response {
    if let Ok(value) = HeaderValue::from_str(session.id().as_str()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn check_protocol_version(headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(version) = headers.get(PROTOCOL_VERSION_HEADER) else {
        return Ok(());
    };
    match version.to_str() {
        Ok(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => Ok(()),
        _ => {
            debug!("Rejected protocol version {:?}", version);
            Err(error_response(
                StatusCode::BAD_REQUEST,
                SERVER_ERROR,
                UNSUPPORTED_VERSION_MESSAGE,
            ))
        }
    }
}

/// The session id header, if present. A value that is not visible ASCII is
/// treated as an invalid id.
fn session_header(headers: &HeaderMap) -> std::result::Result<Option<&str>, Response> {
    match headers.get(SESSION_HEADER) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| bad_request()),
    }
}

/// Resolve the session a GET or DELETE refers to.
fn existing_session(
    state: &HttpServerState,
    headers: &HeaderMap,
) -> std::result::Result<Session, Response> {
    check_protocol_version(headers)?;
    let Some(id) = session_header(headers)? else {
        return Err(bad_request());
    };
    state.sessions.lookup(id).map_err(|e| {
        debug!("Rejected request: {}", e);
        bad_request()
    })
}

async fn handle_post(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    recover_panics(process_post(&state, &headers, body)).await
}

/// Turn a panic inside request handling into a 500 with the error envelope.
async fn recover_panics<F>(request: F) -> Response
where
    F: Future<Output = Response>,
{
    match AssertUnwindSafe(request).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            error!("Unhandled failure while processing POST");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR,
                INTERNAL_ERROR_MESSAGE,
            )
        }
    }
}

async fn process_post(state: &HttpServerState, headers: &HeaderMap, body: Bytes) -> Response {
    if let Err(response) = check_protocol_version(headers) {
        return response;
    }
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Unparsable POST body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, PARSE_ERROR, PARSE_ERROR_MESSAGE);
        }
    };
    let header = match session_header(headers) {
        Ok(header) => header,
        Err(response) => return response,
    };

    let (session, created) = match header {
        None => match state
            .sessions
            .handle_initial(None, &value)
            .and_then(|id| state.sessions.lookup(id.as_str()))
        {
            Ok(session) => (session, true),
            Err(e) => {
                debug!("Rejected POST without session: {}", e);
                return bad_request();
            }
        },
        Some(id) => match state.sessions.lookup(id) {
            Ok(session) => (session, false),
            Err(e) => {
                debug!("Rejected POST: {}", e);
                return bad_request();
            }
        },
    };

    let message: JSONRPCMessage = match serde_json::from_value(value) {
        Ok(message) => message,
        Err(e) => {
            debug!("POST body is not a JSON-RPC message: {}", e);
            if created {
                state.sessions.close_session(session.id().as_str());
            }
            return error_response(StatusCode::BAD_REQUEST, PARSE_ERROR, PARSE_ERROR_MESSAGE);
        }
    };

    let count = session.record_request();
    debug!("Session {} request #{}", session.id(), count);

    let response = match state.dispatcher.handle_message(message).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session_header(response, &session)
}

/// Owns a session's receiver for the lifetime of one SSE response.
///
/// Dropping it hands the receiver back so the client can reconnect, and
/// stops that connection's stream timer.
struct StreamGuard {
    session: Session,
    receiver: Option<mpsc::UnboundedReceiver<JSONRPCMessage>>,
    _stream_timer: DropGuard,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            self.session.restore_receiver(receiver);
        }
        debug!("SSE stream for session {} ended", self.session.id());
    }
}

async fn handle_get(State(state): State<HttpServerState>, headers: HeaderMap) -> Response {
    let session = match existing_session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let Some(receiver) = session.take_receiver() else {
        warn!("Session {} already has an open stream", session.id());
        return error_response(StatusCode::CONFLICT, SERVER_ERROR, STREAM_CONFLICT_MESSAGE);
    };

    let stream_cancel = session.cancellation_token().child_token();
    notify::spawn_stream_timer(session.clone(), state.stream_tick, stream_cancel.clone());
    info!("SSE stream opened for session {}", session.id());

    let mut guard = StreamGuard {
        session: session.clone(),
        receiver: Some(receiver),
        _stream_timer: stream_cancel.drop_guard(),
    };
    let stream = async_stream::stream! {
        loop {
            let next = match guard.receiver.as_mut() {
                Some(receiver) => receiver.next().await,
                None => None,
            };
            let Some(message) = next else { break };
            match serde_json::to_string(&message) {
                Ok(data) => yield Ok::<_, Infallible>(Event::default().data(data)),
                Err(e) => error!("Failed to serialize message for SSE: {}", e),
            }
        }
    };

    let response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    with_session_header(response, &session)
}

async fn handle_delete(State(state): State<HttpServerState>, headers: HeaderMap) -> Response {
    let session = match existing_session(&state, &headers) {
        Ok(session) => session,
        Err(response) => return response,
    };
    state.sessions.close_session(session.id().as_str());
    StatusCode::OK.into_response()
}
