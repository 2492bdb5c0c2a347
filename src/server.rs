use std::time::Duration;

use futures::{stream::FuturesUnordered, SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::Config,
    dispatch::Dispatcher,
    error::{Error, Result},
    http::{self, HttpServerTransport},
    notify::{Broadcaster, DEFAULT_STREAM_TICK, DEFAULT_TOOL_CHANGE_INTERVAL},
    schema::{Implementation, ServerNotification},
    session::{SessionManager, DEFAULT_IDLE_TIMEOUT},
    tools::ToolRegistry,
    transport::{GenericDuplex, StdioTransport, StreamTransport, Transport},
    weather::{WeatherClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT},
};

pub const SERVER_NAME: &str = "weather-mcp";

/// Weather MCP server builder.
#[derive(Debug, Clone)]
pub struct Server {
    server_info: Implementation,
    weather_base_url: String,
    request_timeout: Duration,
    tool_change_interval: Duration,
    stream_tick: Duration,
    session_idle_timeout: Duration,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            server_info: Implementation::new(SERVER_NAME, env!("CARGO_PKG_VERSION"))
                .with_title("Weather"),
            weather_base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            tool_change_interval: DEFAULT_TOOL_CHANGE_INTERVAL,
            stream_tick: DEFAULT_STREAM_TICK,
            session_idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl Server {
    pub fn from_config(config: &Config) -> Self {
        Self::default()
            .with_weather_base_url(&config.weather_base_url)
            .with_request_timeout(config.request_timeout())
            .with_tool_change_interval(config.tool_change_interval())
            .with_stream_tick(config.stream_tick())
            .with_session_idle_timeout(config.session_idle_timeout())
    }

    pub fn with_weather_base_url(mut self, url: impl Into<String>) -> Self {
        self.weather_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tool_change_interval(mut self, interval: Duration) -> Self {
        self.tool_change_interval = interval;
        self
    }

    pub fn with_stream_tick(mut self, tick: Duration) -> Self {
        self.stream_tick = tick;
        self
    }

    /// Close HTTP sessions that see no request and hold no stream for this
    /// long.
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    fn dispatcher(&self, registry: ToolRegistry) -> Result<Dispatcher> {
        let weather = WeatherClient::new(&self.weather_base_url, self.request_timeout)?;
        Ok(Dispatcher::new(registry, weather, self.server_info.clone()))
    }

    /// Serve stdin/stdout until the client disconnects or ctrl-c arrives.
    pub async fn serve_stdio(self) -> Result<()> {
        let handle = ServerHandle::from_transport(self, Box::new(StdioTransport::new())).await?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received ctrl-c, shutting down");
            }
            _ = handle.shutdown_token.cancelled() => {}
        }
        handle.stop().await
    }

    /// Serve one client over any pair of byte streams.
    pub async fn serve_stream<R, W>(self, reader: R, writer: W) -> Result<ServerHandle>
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let duplex = GenericDuplex::new(reader, writer);
        ServerHandle::from_transport(self, Box::new(StreamTransport::new(duplex))).await
    }

    /// Serve streamable HTTP on `addr`. Port 0 picks a free port; the actual
    /// address is in [`ServerHandle::bound_addr`].
    pub async fn serve_http(self, addr: impl AsRef<str>) -> Result<ServerHandle> {
        let registry = ToolRegistry::new();
        let dispatcher = self.dispatcher(registry.clone())?;
        let sessions = SessionManager::new();
        let shutdown_token = CancellationToken::new();

        let router = http::router(sessions.clone(), dispatcher, self.stream_tick);
        let mut transport = HttpServerTransport::new(addr.as_ref());
        let server_task = transport.start(router, shutdown_token.clone()).await?;

        let handle = tokio::spawn(async move {
            match server_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("HTTP server failed: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
        });

        let broadcaster = Broadcaster::new(sessions.clone(), registry);
        let notifier = broadcaster
            .clone()
            .spawn_tool_change_timer(self.tool_change_interval, shutdown_token.clone());
        let reaper = sessions
            .clone()
            .spawn_reaper(self.session_idle_timeout, shutdown_token.clone());

        Ok(ServerHandle {
            handle,
            notifier,
            reaper: Some(reaper),
            sessions,
            broadcaster,
            shutdown_token,
            bound_addr: Some(transport.bind_addr),
        })
    }
}

/// A running server. The tool-change timer and the serving task are owned
/// here and torn down by [`ServerHandle::stop`].
pub struct ServerHandle {
    pub handle: JoinHandle<()>,
    notifier: JoinHandle<()>,
    reaper: Option<JoinHandle<()>>,
    sessions: SessionManager,
    broadcaster: Broadcaster,
    shutdown_token: CancellationToken,
    /// The actual bound address (for servers that bind to a network port)
    pub bound_addr: Option<String>,
}

impl ServerHandle {
    /// Run a single-session server over a framed transport.
    pub async fn from_transport(server: Server, mut transport: Box<dyn Transport>) -> Result<Self> {
        transport.connect().await?;
        let (mut sink, mut incoming) = transport.framed()?.split();

        let registry = ToolRegistry::new();
        let dispatcher = server.dispatcher(registry.clone())?;
        let sessions = SessionManager::new();
        let session = sessions.lookup(sessions.create_session().as_str())?;
        let mut outbound = session.take_receiver().ok_or(Error::TransportDisconnected)?;

        let shutdown_token = CancellationToken::new();
        let broadcaster = Broadcaster::new(sessions.clone(), registry);
        let notifier = broadcaster
            .clone()
            .spawn_tool_change_timer(server.tool_change_interval, shutdown_token.clone());

        let token = shutdown_token.clone();
        let task_sessions = sessions.clone();
        info!("MCP server started on stream transport");

        let handle = tokio::spawn(async move {
            let mut in_flight = FuturesUnordered::new();
            let mut reading = true;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Server received shutdown signal");
                        break;
                    }
                    Some(message) = outbound.next() => {
                        if let Err(e) = sink.send(message).await {
                            error!("Error sending notification to client: {}", e);
                            break;
                        }
                    }
                    result = incoming.next(), if reading => match result {
                        Some(Ok(message)) => {
                            session.record_request();
                            let dispatcher = dispatcher.clone();
                            in_flight.push(async move { dispatcher.handle_message(message).await });
                        }
                        Some(Err(e)) => {
                            error!("Error reading message: {}", e);
                            reading = false;
                        }
                        None => {
                            info!("Client disconnected");
                            reading = false;
                        }
                    },
                    Some(reply) = in_flight.next(), if !in_flight.is_empty() => {
                        if let Some(reply) = reply {
                            if let Err(e) = sink.send(reply).await {
                                error!("Error sending response to client: {}", e);
                                break;
                            }
                        }
                    }
                }
                if !reading && in_flight.is_empty() {
                    break;
                }
            }

            task_sessions.close_all();
            if let Err(e) = sink.close().await {
                debug!("Error closing transport: {}", e);
            }
            token.cancel();
            info!("MCP server stopped");
        });

        Ok(ServerHandle {
            handle,
            notifier,
            reaper: None,
            sessions,
            broadcaster,
            shutdown_token,
            bound_addr: None,
        })
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Cancelled once the server begins shutting down, including when a
    /// stream client disconnects on its own.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Push a notification to every session with an open stream. Returns the
    /// number of sessions that accepted it.
    pub fn send_server_notification(&self, notification: ServerNotification) -> usize {
        self.broadcaster.broadcast(&notification)
    }

    /// Close every session, stop the timers and wait for the serving task.
    pub async fn stop(self) -> Result<()> {
        self.sessions.close_all();
        self.shutdown_token.cancel();
        self.notifier
            .await
            .map_err(|e| Error::InternalError(format!("Notifier task failed: {e}")))?;
        if let Some(reaper) = self.reaper {
            reaper
                .await
                .map_err(|e| Error::InternalError(format!("Session reaper failed: {e}")))?;
        }
        self.handle
            .await
            .map_err(|e| Error::InternalError(format!("Server task failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{make_duplex_pair, read_message, send_message};
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_stream_server_answers_ping_and_exits_on_eof() {
        let (server_reader, server_writer, client_reader, mut client_writer) = make_duplex_pair();
        let handle = Server::default()
            .serve_stream(server_reader, server_writer)
            .await
            .unwrap();
        assert_eq!(handle.sessions().len(), 1);

        let ping = serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .unwrap();
        send_message(&mut client_writer, &ping).await.unwrap();

        let mut reader = BufReader::new(client_reader);
        let reply = serde_json::to_value(read_message(&mut reader).await.unwrap()).unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));

        drop(client_writer);
        handle.shutdown_token().cancelled().await;
        assert!(handle.sessions().is_empty());
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_sessions() {
        let (server_reader, server_writer, _client_reader, _client_writer) = make_duplex_pair();
        let handle = Server::default()
            .serve_stream(server_reader, server_writer)
            .await
            .unwrap();
        let sessions = handle.sessions().clone();
        handle.stop().await.unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            stream_tick_ms: 20,
            session_idle_timeout_secs: 30,
            ..Config::default()
        };
        let server = Server::from_config(&config);
        assert_eq!(server.stream_tick, Duration::from_millis(20));
        assert_eq!(server.session_idle_timeout, Duration::from_secs(30));
        assert_eq!(server.weather_base_url, DEFAULT_BASE_URL);
    }
}
