//! A Model Context Protocol server with one tool, `get-weather`, backed by
//! the Open-Meteo forecast API.
//!
//! Two transports are available:
//!
//! - **stdio**: newline-delimited JSON-RPC on stdin/stdout, one implicit
//!   session.
//! - **streamable HTTP**: `POST /` for requests, `GET /` for a per-session
//!   SSE stream, `DELETE /` to end a session. Sessions are identified by the
//!   `mcp-session-id` header.
//!
//! ```no_run
//! # async fn run() -> weather_mcp::Result<()> {
//! let handle = weather_mcp::Server::default()
//!     .serve_http("127.0.0.1:3000")
//!     .await?;
//! tokio::signal::ctrl_c().await?;
//! handle.stop().await
//! # }
//! ```

mod arguments;
mod codec;
pub mod config;
mod dispatch;
mod error;
pub mod http;
mod jsonrpc;
pub mod notify;
pub mod schema;
mod server;
pub mod session;
pub mod testutils;
mod tools;
mod transport;
pub mod weather;

pub use arguments::Arguments;
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use server::{Server, ServerHandle, SERVER_NAME};
pub use session::{Session, SessionId, SessionManager, SessionState};
pub use tools::{GetWeatherParams, ToolRegistry, GET_WEATHER};
pub use transport::{GenericDuplex, StdioTransport, StreamTransport, Transport, TransportStream};
pub use weather::{WeatherClient, WeatherError, WeatherReport};

// Re-export schemars so downstream code can derive schemas with the same version
pub use schemars;
