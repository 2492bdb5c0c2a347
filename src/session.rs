//! Per-client session tracking.
//!
//! A session ties one client to an outbound message queue. The queue is the
//! session's transport handle: responses and notifications pushed into it are
//! delivered in order by whichever stream currently owns the receiver (an SSE
//! response, or the stdio writer).
//!
//! Sessions move `Open -> Closed` exactly once. A closed id is removed from
//! the map and never handed out again.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::channel::mpsc;
use serde::Deserialize;
use serde_json::Value;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    jsonrpc::create_jsonrpc_notification,
    schema::{InitializeParams, JSONRPCMessage, RequestId, ServerNotification, JSONRPC_VERSION},
};

/// How long an HTTP session may go without a request or an open stream
/// before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Opaque, globally unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Handle to a live session. Clones share the same state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    created_at: Instant,
    last_active: Mutex<Instant>,
    sender: mpsc::UnboundedSender<JSONRPCMessage>,
    // Held by at most one stream at a time; never locked across an await.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<JSONRPCMessage>>>,
    closed: AtomicBool,
    stream_started: AtomicBool,
    requests: AtomicU64,
    cancel: CancellationToken,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let (sender, receiver) = mpsc::unbounded();
        let now = Instant::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                created_at: now,
                last_active: Mutex::new(now),
                sender,
                receiver: Mutex::new(Some(receiver)),
                closed: AtomicBool::new(false),
                stream_started: AtomicBool::new(false),
                requests: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    pub fn state(&self) -> SessionState {
        if self.inner.closed.load(Ordering::SeqCst) {
            SessionState::Closed
        } else {
            SessionState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Queue a message for delivery to the client.
    pub fn send(&self, message: JSONRPCMessage) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        self.inner
            .sender
            .unbounded_send(message)
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn notify(&self, notification: &ServerNotification) -> Result<()> {
        self.send(JSONRPCMessage::Notification(create_jsonrpc_notification(
            notification,
        )))
    }

    /// True while a stream owns the receiver and drains the queue.
    pub fn has_stream(&self) -> bool {
        self.is_open()
            && self
                .inner
                .receiver
                .lock()
                .map(|slot| slot.is_none())
                .unwrap_or(false)
    }

    /// Take the outbound receiver. Returns `None` if another stream holds it
    /// or the session is closed.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<JSONRPCMessage>> {
        if !self.is_open() {
            return None;
        }
        self.inner.receiver.lock().ok()?.take()
    }

    /// Give the receiver back once its stream goes away.
    pub fn restore_receiver(&self, receiver: mpsc::UnboundedReceiver<JSONRPCMessage>) {
        if !self.is_open() {
            return;
        }
        if let Ok(mut slot) = self.inner.receiver.lock() {
            *slot = Some(receiver);
        }
        self.touch();
    }

    fn touch(&self) {
        if let Ok(mut last) = self.inner.last_active.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last request or the end of the last stream.
    pub fn idle_for(&self) -> Duration {
        self.inner
            .last_active
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Returns true for the first caller only.
    pub(crate) fn mark_stream_started(&self) -> bool {
        !self.inner.stream_started.swap(true, Ordering::SeqCst)
    }

    /// Count a request routed to this session and return the new total.
    pub fn record_request(&self) -> u64 {
        self.touch();
        self.inner.requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn request_count(&self) -> u64 {
        self.inner.requests.load(Ordering::SeqCst)
    }

    /// Token cancelled when the session closes.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        // Ends any SSE stream draining the queue.
        self.inner.sender.close_channel();
    }
}

/// Map from session id to live session.
///
/// Each mutation is a single map operation, so concurrent requests cannot
/// lose updates.
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh open session and return its id.
    pub fn create_session(&self) -> SessionId {
        loop {
            let id = SessionId::generate();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                slot.insert(Session::new(id.clone()));
                info!("Session {} opened", id);
                return id;
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Result<Session> {
        if id.trim().is_empty() {
            return Err(Error::BadRequest("missing session ID".into()));
        }
        self.sessions
            .get(&SessionId::from(id))
            .map(|s| s.value().clone())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Provision a session for a first-contact request.
    ///
    /// Accepted only when the client sent no session id and the body is an
    /// initialize request. For a batch, one initialize element is enough.
    pub fn handle_initial(&self, session_id: Option<&str>, body: &Value) -> Result<SessionId> {
        if session_id.is_some() {
            return Err(Error::BadRequest(
                "session ID supplied on initialization".into(),
            ));
        }
        if !is_initialize_payload(body) {
            return Err(Error::BadRequest("not an initialize request".into()));
        }
        Ok(self.create_session())
    }

    /// Close and forget a session. Closing an unknown id is a no-op.
    pub fn close_session(&self, id: &str) -> bool {
        match self.sessions.remove(&SessionId::from(id)) {
            Some((_, session)) => {
                session.close();
                info!("Session {} closed", id);
                true
            }
            None => {
                debug!("Session {} already closed", id);
                false
            }
        }
    }

    pub fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for id in ids {
            self.close_session(id.as_str());
        }
    }

    /// Close sessions with no open stream that have been idle for at least
    /// `max_idle`. Returns how many were closed.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<SessionId> = self
            .sessions()
            .into_iter()
            .filter(|s| !s.has_stream() && s.idle_for() >= max_idle)
            .map(|s| s.id().clone())
            .collect();
        for id in &expired {
            info!("Session {} expired after {:?} idle", id, max_idle);
            self.close_session(id.as_str());
        }
        expired.len()
    }

    /// Periodically expire idle sessions until `shutdown` is cancelled.
    pub fn spawn_reaper(self, max_idle: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = (max_idle / 2).max(Duration::from_millis(10));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.expire_idle(max_idle);
                    }
                }
            }
        })
    }

    /// Snapshot of the open sessions. No map guard outlives this call.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[derive(Deserialize)]
struct InitializeShape {
    jsonrpc: String,
    #[allow(dead_code)]
    id: RequestId,
    method: String,
    #[allow(dead_code)]
    params: InitializeParams,
}

fn is_initialize_request(value: &Value) -> bool {
    InitializeShape::deserialize(value)
        .map(|r| r.jsonrpc == JSONRPC_VERSION && r.method == "initialize")
        .unwrap_or(false)
}

/// True if `body` is an initialize request, or a batch with at least one.
pub fn is_initialize_payload(body: &Value) -> bool {
    match body {
        Value::Array(items) => items.iter().any(is_initialize_request),
        other => is_initialize_request(other),
    }
}
