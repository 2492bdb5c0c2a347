//! Server-initiated notifications.
//!
//! Two timers feed session queues: the process-wide tool-change timer, and a
//! short per-session stream that starts when a client opens its SSE channel.

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    schema::ServerNotification,
    session::{Session, SessionManager},
    tools::ToolRegistry,
};

pub const DEFAULT_TOOL_CHANGE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STREAM_TICK: Duration = Duration::from_secs(1);

/// Number of numbered messages a session stream sends before completing.
pub const STREAM_MESSAGE_COUNT: usize = 2;

const STREAM_LOGGER: &str = "stream";
pub const STREAM_ESTABLISHED: &str = "Connection established";
pub const STREAM_COMPLETE: &str = "Stream complete";

/// Fans notifications out to every registered session.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sessions: SessionManager,
    registry: ToolRegistry,
}

impl Broadcaster {
    pub fn new(sessions: SessionManager, registry: ToolRegistry) -> Self {
        Self { sessions, registry }
    }

    /// Send `notification` to every session with an open stream. Returns how
    /// many accepted it. A failed session is logged and skipped.
    ///
    /// Sessions without a stream are passed over, so a client that never
    /// listens does not accumulate a backlog.
    pub fn broadcast(&self, notification: &ServerNotification) -> usize {
        let mut delivered = 0;
        for session in self.sessions.sessions() {
            if !session.has_stream() {
                debug!(
                    "Session {} has no open stream, skipping {}",
                    session.id(),
                    notification.method()
                );
                continue;
            }
            match session.notify(notification) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to deliver {} to session {}: {}",
                    notification.method(),
                    session.id(),
                    e
                ),
            }
        }
        delivered
    }

    /// Republish the tool list and tell every session about it.
    pub fn tool_list_changed(&self) -> usize {
        let revision = self.registry.republish();
        let delivered = self.broadcast(&ServerNotification::ToolListChanged);
        debug!(
            "Tool list revision {} announced to {} session(s)",
            revision, delivered
        );
        delivered
    }

    /// Run the tool-change timer until `shutdown` is cancelled.
    pub fn spawn_tool_change_timer(
        self,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Tool change timer started ({:?})", period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tool_list_changed();
                    }
                }
            }
            info!("Tool change timer stopped");
        })
    }
}

/// The informational messages a session stream sends, in order.
pub fn stream_messages() -> Vec<String> {
    let mut messages = Vec::with_capacity(STREAM_MESSAGE_COUNT + 2);
    messages.push(STREAM_ESTABLISHED.to_string());
    messages.extend((1..=STREAM_MESSAGE_COUNT).map(|n| format!("Message {n}")));
    messages.push(STREAM_COMPLETE.to_string());
    messages
}

/// Start the bounded stream sequence for `session`.
///
/// Returns `None` if the session already ran its stream. The task stops
/// early when `cancel` fires or the session closes.
pub fn spawn_stream_timer(
    session: Session,
    tick: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !session.mark_stream_started() {
        debug!("Stream timer already ran for session {}", session.id());
        return None;
    }
    let session_closed = session.cancellation_token().clone();
    Some(tokio::spawn(async move {
        let mut messages = stream_messages().into_iter();
        let Some(first) = messages.next() else {
            return;
        };
        if !send_stream_message(&session, &first) {
            return;
        }

        let mut ticker = interval_at(Instant::now() + tick, tick);
        for message in messages {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Stream timer for session {} cancelled", session.id());
                    return;
                }
                _ = session_closed.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if !send_stream_message(&session, &message) {
                return;
            }
        }
        debug!("Stream timer for session {} finished", session.id());
    }))
}

fn send_stream_message(session: &Session, text: &str) -> bool {
    match session.notify(&ServerNotification::info(STREAM_LOGGER, text)) {
        Ok(()) => true,
        Err(e) => {
            warn!("Stream message to session {} dropped: {}", session.id(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::JSONRPCMessage;
    use futures::StreamExt;

    fn data(message: JSONRPCMessage) -> Option<String> {
        match message {
            JSONRPCMessage::Notification(n) => n
                .notification
                .params
                .and_then(|p| p.other.get("data").and_then(|d| d.as_str().map(String::from))),
            _ => None,
        }
    }

    #[test]
    fn test_stream_messages() {
        assert_eq!(
            stream_messages(),
            vec![
                "Connection established",
                "Message 1",
                "Message 2",
                "Stream complete"
            ]
        );
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_sessions() {
        let sessions = SessionManager::new();
        let a = sessions.lookup(sessions.create_session().as_str()).unwrap();
        let b = sessions.lookup(sessions.create_session().as_str()).unwrap();
        let mut rx_a = a.take_receiver().unwrap();
        // b's receiver is dropped, so sends to it fail.
        drop(b.take_receiver());

        let broadcaster = Broadcaster::new(sessions.clone(), ToolRegistry::new());
        assert_eq!(broadcaster.tool_list_changed(), 1);

        match rx_a.next().await {
            Some(JSONRPCMessage::Notification(n)) => {
                assert_eq!(n.notification.method, "notifications/tools/list_changed")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_broadcast_does_not_queue_without_stream() {
        let sessions = SessionManager::new();
        let session = sessions.lookup(sessions.create_session().as_str()).unwrap();
        let broadcaster = Broadcaster::new(sessions.clone(), ToolRegistry::new());

        // A day of ticks at the default period.
        for _ in 0..8640 {
            assert_eq!(broadcaster.tool_list_changed(), 0);
        }

        let mut rx = session.take_receiver().unwrap();
        assert!(rx.try_next().is_err());
        assert_eq!(broadcaster.tool_list_changed(), 1);
        assert!(matches!(rx.try_next(), Ok(Some(JSONRPCMessage::Notification(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_change_timer_ticks_and_stops() {
        let sessions = SessionManager::new();
        let session = sessions.lookup(sessions.create_session().as_str()).unwrap();
        let mut rx = session.take_receiver().unwrap();
        let registry = ToolRegistry::new();
        let shutdown = CancellationToken::new();

        let handle = Broadcaster::new(sessions, registry.clone())
            .spawn_tool_change_timer(Duration::from_secs(10), shutdown.clone());

        for _ in 0..2 {
            assert!(matches!(rx.next().await, Some(JSONRPCMessage::Notification(_))));
        }
        assert!(registry.revision() >= 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_timer_sends_bounded_sequence() {
        let sessions = SessionManager::new();
        let id = sessions.create_session();
        let session = sessions.lookup(id.as_str()).unwrap();
        let mut rx = session.take_receiver().unwrap();

        let tick = Duration::from_secs(1);
        let handle = spawn_stream_timer(session.clone(), tick, CancellationToken::new()).unwrap();
        assert!(spawn_stream_timer(session.clone(), tick, CancellationToken::new()).is_none());
        handle.await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(data(rx.next().await.unwrap()).unwrap());
        }
        assert_eq!(seen, stream_messages());

        // Nothing else is queued once the sequence completes.
        sessions.close_session(id.as_str());
        assert!(rx.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_timer_stops_when_session_closes() {
        let sessions = SessionManager::new();
        let id = sessions.create_session();
        let session = sessions.lookup(id.as_str()).unwrap();
        let mut rx = session.take_receiver().unwrap();

        let handle =
            spawn_stream_timer(session, Duration::from_secs(1), CancellationToken::new()).unwrap();
        assert_eq!(
            data(rx.next().await.unwrap()).as_deref(),
            Some(STREAM_ESTABLISHED)
        );
        sessions.close_session(id.as_str());
        handle.await.unwrap();
        assert!(rx.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_timer_stops_on_cancel() {
        let sessions = SessionManager::new();
        let session = sessions.lookup(sessions.create_session().as_str()).unwrap();
        let mut rx = session.take_receiver().unwrap();
        let cancel = CancellationToken::new();

        let handle =
            spawn_stream_timer(session.clone(), Duration::from_secs(1), cancel.clone()).unwrap();
        assert!(rx.next().await.is_some());
        cancel.cancel();
        handle.await.unwrap();

        assert!(session.is_open());
        assert!(rx.try_next().is_err());
    }
}
