//! Test utilities for `weather_mcp`.
//!
//! Helpers shared by the unit tests and the integration tests under `tests/`:
//! in-memory duplex pipes for the stream transport, newline-delimited
//! JSON-RPC read/write helpers, canned protocol messages, and a fake
//! Open-Meteo server that runs in-process on an ephemeral port.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    schema::{JSONRPCMessage, LATEST_PROTOCOL_VERSION},
};

/// Two in-memory pipes forming one bidirectional channel.
///
/// The first pair goes to the server (`reader`, `writer`), the second to the
/// client.
pub fn make_duplex_pair() -> (
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
    impl AsyncRead + Send + Sync + Unpin + 'static,
    impl AsyncWrite + Send + Sync + Unpin + 'static,
) {
    let (server_reader, client_writer) = io::duplex(64 * 1024);
    let (client_reader, server_writer) = io::duplex(64 * 1024);
    (server_reader, server_writer, client_reader, client_writer)
}

/// Write one message followed by `\n`.
pub async fn send_message<W>(writer: &mut W, message: &JSONRPCMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message)?;
    writer.write_all(&json).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-delimited message.
pub async fn read_message<R>(reader: &mut BufReader<R>) -> Result<JSONRPCMessage>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf).await?;
    if buf.is_empty() {
        return Err(Error::Transport("Stream closed".into()));
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(serde_json::from_slice(&buf)?)
}

/// A well-formed `initialize` request body.
pub fn initialize_request(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }
    })
}

/// A `tools/call` request for the weather tool.
pub fn weather_call(id: i64, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": "get-weather", "arguments": arguments}
    })
}

/// A forecast body shaped like Open-Meteo's.
pub fn sample_forecast() -> Value {
    json!({
        "latitude": 52.52,
        "longitude": 13.419998,
        "generationtime_ms": 0.05,
        "utc_offset_seconds": 0,
        "timezone": "GMT",
        "current_units": {
            "time": "iso8601",
            "interval": "seconds",
            "temperature_2m": "°C",
            "wind_speed_10m": "km/h"
        },
        "current": {
            "time": "2025-01-01T12:00",
            "interval": 900,
            "temperature_2m": 3.4,
            "wind_speed_10m": 11.2
        },
        "hourly_units": {
            "time": "iso8601",
            "temperature_2m": "°C",
            "relative_humidity_2m": "%",
            "wind_speed_10m": "km/h"
        },
        "hourly": {
            "time": ["2025-01-01T00:00", "2025-01-01T01:00"],
            "temperature_2m": [2.1, 1.8],
            "relative_humidity_2m": [88, 90],
            "wind_speed_10m": [9.7, 10.4]
        }
    })
}

#[derive(Clone)]
struct FakeState {
    status: StatusCode,
    body: Value,
    delay: Duration,
    hits: Arc<AtomicUsize>,
    last_query: Arc<Mutex<Option<HashMap<String, String>>>>,
}

/// In-process stand-in for the Open-Meteo forecast endpoint.
///
/// Serves `GET /v1/forecast` with a fixed status and body, optionally after
/// a delay, and records how often it was called. Stops when dropped.
pub struct FakeWeatherApi {
    base_url: String,
    state: FakeState,
    shutdown: CancellationToken,
}

impl FakeWeatherApi {
    /// Answer every request with `status` and `body`.
    pub async fn start(status: StatusCode, body: Value) -> Result<Self> {
        Self::start_delayed(status, body, Duration::ZERO).await
    }

    /// Like [`FakeWeatherApi::healthy`], but each answer waits `delay` first.
    pub async fn slow(delay: Duration) -> Result<Self> {
        Self::start_delayed(StatusCode::OK, sample_forecast(), delay).await
    }

    async fn start_delayed(status: StatusCode, body: Value, delay: Duration) -> Result<Self> {
        let state = FakeState {
            status,
            body,
            delay,
            hits: Arc::new(AtomicUsize::new(0)),
            last_query: Arc::new(Mutex::new(None)),
        };
        let router = Router::new()
            .route("/v1/forecast", get(forecast))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
        });

        Ok(Self {
            base_url: format!("http://{addr}/v1"),
            state,
            shutdown,
        })
    }

    /// Answer with [`sample_forecast`].
    pub async fn healthy() -> Result<Self> {
        Self::start(StatusCode::OK, sample_forecast()).await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Query parameters of the most recent request.
    pub fn last_query(&self) -> Option<HashMap<String, String>> {
        self.state.last_query.lock().ok()?.clone()
    }
}

impl Drop for FakeWeatherApi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn forecast(
    State(state): State<FakeState>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut last) = state.last_query.lock() {
        *last = Some(query);
    }
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, Json(state.body.clone()))
}
