//! JSON-RPC frames exchanged with the Qlik Engine API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QlikFetcherError, Result};

/// Handle of the engine's global interface, the target of `OpenDoc`.
pub const GLOBAL_HANDLE: i64 = -1;

pub mod methods {
    pub const OPEN_DOC: &str = "OpenDoc";
    pub const GET_OBJECTS: &str = "GetObjects";
    pub const CREATE_SESSION_OBJECT: &str = "CreateSessionObject";
    pub const GET_LAYOUT: &str = "GetLayout";
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub handle: i64,
    pub method: &'static str,
    pub params: Value,
}

impl EngineRequest {
    pub fn new(id: u64, handle: i64, method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            handle,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineApiError {
    pub code: i64,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Any frame received from the engine.
///
/// Replies carry the `id` of the request they answer. Frames without an id are
/// notifications pushed by the engine (`OnConnected`, `OnAuthenticationInformation`).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<EngineApiError>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl EngineMessage {
    pub fn into_reply(self) -> Option<EngineReply> {
        let id = self.id?;
        Some(EngineReply {
            id,
            result: self.result.unwrap_or(Value::Null),
            error: self.error,
        })
    }
}

/// A reply correlated to an outgoing request by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReply {
    pub id: u64,
    pub result: Value,
    pub error: Option<EngineApiError>,
}

impl EngineReply {
    /// Reads `result.qReturn.qHandle`, the interface handle returned by `OpenDoc`
    /// and `CreateSessionObject`.
    pub fn return_handle(&self) -> Result<i64> {
        self.result
            .pointer("/qReturn/qHandle")
            .and_then(Value::as_i64)
            .ok_or(QlikFetcherError::MissingField("qReturn.qHandle"))
    }

    pub fn into_error(self) -> Option<QlikFetcherError> {
        self.error.map(|err| QlikFetcherError::EngineApi {
            code: err.code,
            message: match err.parameter {
                Some(parameter) if !parameter.is_empty() => {
                    format!("{} ({parameter})", err.message)
                }
                _ => err.message,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_in_engine_shape() {
        let request = EngineRequest::new(1, GLOBAL_HANDLE, methods::OPEN_DOC, json!({"qDocName": "app"}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "handle": -1,
                "method": "OpenDoc",
                "params": {"qDocName": "app"}
            })
        );
    }

    #[test]
    fn notification_has_no_reply() {
        let message: EngineMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"OnConnected","params":{"qSessionState":"SESSION_CREATED"}}"#,
        )
        .unwrap();
        assert_eq!(message.method.as_deref(), Some("OnConnected"));
        assert!(message.into_reply().is_none());
    }

    #[test]
    fn reply_exposes_return_handle() {
        let message: EngineMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{"qReturn":{"qType":"Doc","qHandle":7,"qGenericId":"app"}}}"#,
        )
        .unwrap();
        let reply = message.into_reply().unwrap();
        assert_eq!(reply.id, 1);
        assert_eq!(reply.return_handle().unwrap(), 7);
    }

    #[test]
    fn reply_without_handle_is_missing_field() {
        let reply = EngineReply {
            id: 3,
            result: json!({"qList": []}),
            error: None,
        };
        assert!(matches!(
            reply.return_handle(),
            Err(QlikFetcherError::MissingField("qReturn.qHandle"))
        ));
    }

    #[test]
    fn error_reply_converts_to_engine_api_error() {
        let message: EngineMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":1002,"parameter":"App already open","message":"App already open"}}"#,
        )
        .unwrap();
        let err = message.into_reply().unwrap().into_error().unwrap();
        match err {
            QlikFetcherError::EngineApi { code, message } => {
                assert_eq!(code, 1002);
                assert!(message.starts_with("App already open"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
