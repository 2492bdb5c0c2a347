use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    arguments::Arguments,
    error::{Error, Result},
    jsonrpc::result_to_jsonrpc_response,
    schema::*,
    tools::{ToolRegistry, GET_WEATHER},
    weather::WeatherClient,
};

/// Routes inbound protocol messages to the tool registry and weather client.
///
/// Every failure is turned into a JSON-RPC error envelope; nothing escapes as
/// a Rust error.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ToolRegistry,
    weather: WeatherClient,
    server_info: Implementation,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, weather: WeatherClient, server_info: Implementation) -> Self {
        Self {
            registry,
            weather,
            server_info,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one inbound message, returning the reply if one is owed.
    pub async fn handle_message(&self, message: JSONRPCMessage) -> Option<JSONRPCMessage> {
        match message {
            JSONRPCMessage::Request(request) => Some(self.handle_request(request).await.into()),
            JSONRPCMessage::Notification(notification) => {
                self.handle_notification(notification);
                None
            }
            JSONRPCMessage::BatchRequest(items) => {
                let replies = join_all(items.into_iter().map(|item| async move {
                    match item {
                        JSONRPCRequestOrNotification::Request(r) => {
                            Some(self.handle_request(r).await)
                        }
                        JSONRPCRequestOrNotification::Notification(n) => {
                            self.handle_notification(n);
                            None
                        }
                    }
                }))
                .await;
                let replies: JSONRPCBatchResponse = replies.into_iter().flatten().collect();
                if replies.is_empty() {
                    None
                } else {
                    Some(JSONRPCMessage::BatchResponse(replies))
                }
            }
            JSONRPCMessage::Response(_)
            | JSONRPCMessage::Error(_)
            | JSONRPCMessage::BatchResponse(_) => {
                warn!("Ignoring unsolicited response from client");
                None
            }
        }
    }

    pub async fn handle_request(&self, request: JSONRPCRequest) -> JSONRPCResponseOrError {
        debug!(
            "Handling request {:?} method: {}",
            request.id, request.request.method
        );
        let id = request.id.clone();
        result_to_jsonrpc_response(id, self.handle_request_inner(request).await)
    }

    async fn handle_request_inner(&self, request: JSONRPCRequest) -> Result<serde_json::Value> {
        let mut request_obj = serde_json::Map::new();
        request_obj.insert(
            "method".to_string(),
            serde_json::Value::String(request.request.method.clone()),
        );
        if let Some(params) = request.request.params {
            for (key, value) in params.other {
                request_obj.insert(key, value);
            }
        }

        let client_request =
            match serde_json::from_value::<ClientRequest>(serde_json::Value::Object(request_obj)) {
                Ok(req) => req,
                Err(err) => {
                    if err.to_string().contains("unknown variant") {
                        return Err(Error::MethodNotFound(request.request.method));
                    }
                    return Err(Error::InvalidParams(format!(
                        "Invalid parameters for {}: {}",
                        request.request.method, err
                    )));
                }
            };

        match client_request {
            ClientRequest::Initialize {
                protocol_version,
                client_info,
                ..
            } => {
                info!(
                    "Initialize from {} {} (protocol {})",
                    client_info.name, client_info.version, protocol_version
                );
                let mut result = InitializeResult::new(self.server_info.clone())
                    .with_tools(true)
                    .with_logging();
                if SUPPORTED_PROTOCOL_VERSIONS.contains(&protocol_version.as_str()) {
                    result.protocol_version = protocol_version;
                }
                Ok(serde_json::to_value(result)?)
            }
            ClientRequest::Ping => Ok(json!({})),
            ClientRequest::ListTools { .. } => Ok(serde_json::to_value(self.registry.list())?),
            ClientRequest::CallTool { name, arguments } => {
                let result = self.call_tool(&name, arguments).await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }

    /// Validate and run a tool call.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Arguments>,
    ) -> Result<CallToolResult> {
        if !self.registry.contains(name) {
            return Err(Error::ToolNotFound(name.to_string()));
        }
        match name {
            GET_WEATHER => {
                let arguments = arguments.unwrap_or_default();
                let latitude = arguments.require_text("latitude")?;
                let longitude = arguments.require_text("longitude")?;

                let report = self.weather.fetch_current(&latitude, &longitude).await?;
                Ok(CallToolResult::new()
                    .with_text_content(report.summary())
                    .with_structured_content(serde_json::to_value(&report)?)
                    .is_error(false))
            }
            other => Err(Error::ToolNotFound(other.to_string())),
        }
    }

    fn handle_notification(&self, notification: JSONRPCNotification) {
        let mut object = serde_json::Map::new();
        object.insert(
            "method".to_string(),
            serde_json::Value::String(notification.notification.method.clone()),
        );
        if let Some(params) = notification.notification.params {
            for (k, v) in params.other {
                object.insert(k, v);
            }
        }

        match serde_json::from_value::<ClientNotification>(serde_json::Value::Object(object)) {
            Ok(ClientNotification::Initialized) => info!("Client finished initialization"),
            Ok(other) => debug!("Received notification: {:?}", other),
            Err(e) => warn!(
                "Ignoring notification {}: {}",
                notification.notification.method, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::DEFAULT_TIMEOUT;

    fn dispatcher() -> Dispatcher {
        // Nothing listens on port 9; tests here never get that far.
        let weather = WeatherClient::new("http://127.0.0.1:9", DEFAULT_TIMEOUT).unwrap();
        Dispatcher::new(
            ToolRegistry::new(),
            weather,
            Implementation::new("weather-mcp", "test"),
        )
    }

    fn request(method: &str, params: serde_json::Value) -> JSONRPCRequest {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    fn expect_error(reply: JSONRPCResponseOrError) -> ErrorObject {
        match reply {
            JSONRPCResponseOrError::Error(e) => e.error,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initialize_advertises_tools() {
        let reply = dispatcher()
            .handle_request(request(
                "initialize",
                json!({"protocolVersion": "2025-03-26", "capabilities": {}, "clientInfo": {"name": "c", "version": "1"}}),
            ))
            .await;
        match reply {
            JSONRPCResponseOrError::Response(r) => {
                assert_eq!(r.result.other["protocolVersion"], "2025-03-26");
                assert_eq!(r.result.other["capabilities"]["tools"]["listChanged"], true);
                assert_eq!(r.result.other["serverInfo"]["name"], "weather-mcp");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_tools() {
        let reply = dispatcher().handle_request(request("tools/list", json!({}))).await;
        match reply {
            JSONRPCResponseOrError::Response(r) => {
                assert_eq!(r.result.other["tools"][0]["name"], GET_WEATHER);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_method_not_found() {
        let err = expect_error(
            dispatcher()
                .handle_request(request(
                    "tools/call",
                    json!({"name": "get-forecast", "arguments": {"latitude": "1", "longitude": "2"}}),
                ))
                .await,
        );
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(err.message.contains("get-forecast"));
    }

    #[tokio::test]
    async fn test_latitude_checked_before_longitude() {
        let d = dispatcher();
        let err = expect_error(
            d.handle_request(request("tools/call", json!({"name": GET_WEATHER, "arguments": {}})))
                .await,
        );
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.message.contains("latitude"));

        let err = expect_error(
            d.handle_request(request(
                "tools/call",
                json!({"name": GET_WEATHER, "arguments": {"latitude": "52.5"}}),
            ))
            .await,
        );
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.message.contains("longitude"));
    }

    #[tokio::test]
    async fn test_missing_arguments_object() {
        let err = expect_error(
            dispatcher()
                .handle_request(request("tools/call", json!({"name": GET_WEATHER})))
                .await,
        );
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.message.contains("latitude"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let err = expect_error(
            dispatcher()
                .handle_request(request("resources/list", json!({})))
                .await,
        );
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let message: JSONRPCMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(dispatcher().handle_message(message).await.is_none());
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_skips_notifications() {
        let message: JSONRPCMessage = serde_json::from_value(json!([
            {"jsonrpc": "2.0", "id": "a", "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": "b", "method": "tools/list"}
        ]))
        .unwrap();
        match dispatcher().handle_message(message).await {
            Some(JSONRPCMessage::BatchResponse(replies)) => {
                assert_eq!(replies.len(), 2);
                let ids: Vec<_> = replies
                    .iter()
                    .map(|r| match r {
                        JSONRPCResponseOrError::Response(r) => r.id.clone(),
                        JSONRPCResponseOrError::Error(e) => e.id.clone(),
                    })
                    .collect();
                assert_eq!(
                    ids,
                    vec![RequestId::String("a".into()), RequestId::String("b".into())]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
