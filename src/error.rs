use thiserror::Error;

use crate::{
    schema::{
        ErrorObject, JSONRPCError, RequestId, INTERNAL_ERROR, INVALID_PARAMS, JSONRPC_VERSION,
        METHOD_NOT_FOUND, SERVER_ERROR,
    },
    weather::WeatherError,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport disconnected")]
    TransportDisconnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Failed to fetch weather data: {0}")]
    Weather(#[from] WeatherError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::MethodNotFound(_) | Error::ToolNotFound(_) => METHOD_NOT_FOUND,
            Error::InvalidParams(_) | Error::Weather(WeatherError::MissingCoordinate(_)) => {
                INVALID_PARAMS
            }
            Error::BadRequest(_) | Error::SessionNotFound(_) => SERVER_ERROR,
            _ => INTERNAL_ERROR,
        }
    }

    /// Build the error envelope sent back for request `id`.
    pub fn to_jsonrpc_error(&self, id: RequestId) -> JSONRPCError {
        let message = match self {
            // Input errors surface as parameter errors, not as fetch failures.
            Error::Weather(inner @ WeatherError::MissingCoordinate(_)) => inner.to_string(),
            other => other.to_string(),
        };
        JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code: self.code(),
                message,
                data: None,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
