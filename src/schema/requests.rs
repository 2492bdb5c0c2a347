use super::*;
use crate::Arguments;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Messages sent from the client to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub(crate) enum ClientRequest {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "initialize")]
    Initialize {
        /// The latest version of the Model Context Protocol that the client
        /// supports.
        #[serde(rename = "protocolVersion")]
        protocol_version: String,
        #[serde(default)]
        capabilities: ClientCapabilities,
        #[serde(rename = "clientInfo")]
        client_info: Implementation,
    },
    #[serde(rename = "tools/call")]
    CallTool {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Arguments>,
    },
    #[serde(rename = "tools/list")]
    ListTools {
        /// Pagination position. The tool list is never paginated, so this is
        /// accepted and ignored.
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<Cursor>,
    },
}

/// Notifications sent from the client to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ClientNotification {
    #[serde(rename = "notifications/cancelled")]
    Cancelled {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Sent by the client after initialization has finished.
    #[serde(rename = "notifications/initialized")]
    Initialized,

    #[serde(rename = "notifications/roots/list_changed")]
    RootsListChanged,
}

/// Notifications pushed from the server to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method")]
pub enum ServerNotification {
    /// Notification of a log message passed from server to client.
    #[serde(rename = "notifications/message")]
    LoggingMessage {
        /// The severity of this log message.
        level: LoggingLevel,
        /// An optional name of the logger issuing this message.
        #[serde(skip_serializing_if = "Option::is_none")]
        logger: Option<String>,
        /// The data to be logged.
        data: Value,
    },

    /// The list of tools offered by the server has changed.
    #[serde(rename = "notifications/tools/list_changed")]
    ToolListChanged,
}

impl ServerNotification {
    /// An informational log message carrying plain text.
    pub fn info(logger: impl Into<String>, text: impl Into<String>) -> Self {
        ServerNotification::LoggingMessage {
            level: LoggingLevel::Info,
            logger: Some(logger.into()),
            data: Value::String(text.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_from_method_object() {
        let req: ClientRequest = serde_json::from_value(serde_json::json!({
            "method": "tools/call",
            "name": "get-weather",
            "arguments": {"latitude": "1", "longitude": "2"}
        }))
        .unwrap();
        match req {
            ClientRequest::CallTool { name, arguments } => {
                assert_eq!(name, "get-weather");
                assert_eq!(arguments.unwrap().get_string("latitude").unwrap(), "1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method_is_unknown_variant() {
        let err = serde_json::from_value::<ClientRequest>(serde_json::json!({
            "method": "resources/list"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }
}
