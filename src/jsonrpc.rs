use crate::{
    error::Result,
    schema::{self, *},
};

/// Create a JSONRPC notification from a typed server notification
pub fn create_jsonrpc_notification(notification: &ServerNotification) -> JSONRPCNotification {
    let method = notification.method().to_string();
    let params = serde_json::to_value(notification)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .map(|mut obj| {
            // The tag is carried by `method`, not repeated in params.
            obj.remove("method");
            obj
        })
        .filter(|obj| !obj.is_empty())
        .map(|obj| NotificationParams {
            _meta: None,
            other: obj.into_iter().collect(),
        });

    JSONRPCNotification {
        jsonrpc: JSONRPC_VERSION.to_string(),
        notification: Notification { method, params },
    }
}

impl schema::ServerNotification {
    pub fn method(&self) -> &'static str {
        match self {
            ServerNotification::LoggingMessage { .. } => "notifications/message",
            ServerNotification::ToolListChanged => "notifications/tools/list_changed",
        }
    }
}

/// Convert a handler result to a response envelope for request `id`
pub fn result_to_jsonrpc_response(
    id: RequestId,
    result: Result<serde_json::Value>,
) -> JSONRPCResponseOrError {
    match result {
        Ok(value) => JSONRPCResponseOrError::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: JSONRpcResult {
                _meta: None,
                other: match value {
                    serde_json::Value::Object(obj) => obj.into_iter().collect(),
                    other => std::iter::once(("result".to_string(), other)).collect(),
                },
            },
        }),
        Err(e) => JSONRPCResponseOrError::Error(e.to_jsonrpc_error(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_tool_list_changed_has_no_params() {
        let n = create_jsonrpc_notification(&ServerNotification::ToolListChanged);
        assert_eq!(n.notification.method, "notifications/tools/list_changed");
        assert!(n.notification.params.is_none());
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            serde_json::json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"})
        );
    }

    #[test]
    fn test_logging_message_params() {
        let n = create_jsonrpc_notification(&ServerNotification::info("stream", "hello"));
        let params = n.notification.params.unwrap().other;
        assert_eq!(params["level"], "info");
        assert_eq!(params["logger"], "stream");
        assert_eq!(params["data"], "hello");
        assert!(!params.contains_key("method"));
    }

    #[test]
    fn test_result_to_response() {
        let ok = result_to_jsonrpc_response(RequestId::Number(1), Ok(serde_json::json!({"a": 1})));
        match ok {
            JSONRPCResponseOrError::Response(r) => assert_eq!(r.result.other["a"], 1),
            other => panic!("unexpected {other:?}"),
        }

        let err = result_to_jsonrpc_response(
            RequestId::Number(2),
            Err(Error::MethodNotFound("nope".into())),
        );
        match err {
            JSONRPCResponseOrError::Error(e) => assert_eq!(e.error.code, METHOD_NOT_FOUND),
            other => panic!("unexpected {other:?}"),
        }
    }
}
