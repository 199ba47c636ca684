//! JSON-RPC 2.0 protocol types.
//!
//! Outbound traffic is always a [`Request`]. Inbound text frames are classified
//! into a [`Message`]: a frame carrying a `method` key is a server
//! [`Notification`], otherwise a frame carrying an `id` key is a [`Response`]
//! to one of our requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Name of the pseudo-notification synthesized by the session after every
/// successful connection.
pub const CONNECTED_METHOD: &str = "connected";

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl Request {
    /// Build a request envelope. Absent params are sent as an empty object.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: params.unwrap_or_else(|| Value::Object(Map::new())),
            id,
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    #[must_use]
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: u64, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse the reply into the value a caller waits for.
    ///
    /// # Errors
    ///
    /// Returns the embedded [`RpcError`] when the controller reported one.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Server-pushed notification.
///
/// `params` holds the payload only: the first element of the wire `params`
/// array, or an empty object when the frame carried none.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// The `connected` pseudo-event with an empty payload.
    #[must_use]
    pub fn connected() -> Self {
        Self::new(CONNECTED_METHOD, Value::Object(Map::new()))
    }

    fn from_wire(method: String, params: Option<Value>) -> Self {
        let params = match params {
            Some(Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
            _ => Value::Object(Map::new()),
        };
        Self { method, params }
    }
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Classified inbound frame
#[derive(Debug, Clone)]
pub enum Message {
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Parse a text frame.
    ///
    /// Returns `Ok(None)` for well-formed JSON that is neither a notification
    /// nor a reply with an integer id.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON.
    pub fn parse(json: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(value))
    }

    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut obj) = value else {
            return None;
        };

        if let Some(method) = obj.remove("method") {
            let method = match method {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Some(Message::Notification(Notification::from_wire(
                method,
                obj.remove("params"),
            )));
        }

        let id = obj.get("id")?.as_u64()?;
        let error = obj
            .remove("error")
            .filter(|e| !e.is_null())
            .map(|e| {
                serde_json::from_value::<RpcError>(e.clone())
                    .unwrap_or_else(|_| RpcError::new(0, e.to_string()))
            });
        Some(Message::Response(Response {
            id,
            result: obj.remove("result"),
            error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("printer.gcode.script", Some(json!({"script": "G28"})), 7);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"printer.gcode.script\""));
        assert!(json.contains("\"script\":\"G28\""));
        assert!(json.contains("\"id\":7"));
    }

    #[test]
    fn test_request_without_params_sends_empty_object() {
        let req = Request::new("printer.emergency_stop", None, 1);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["params"], json!({}));
    }

    #[test]
    fn test_parse_notification_takes_first_param() {
        let frame = r#"{"jsonrpc":"2.0","method":"notify_status_update","params":[{"extruder":{"temperature":210.0}},1234.5]}"#;
        let msg = Message::parse(frame).unwrap().unwrap();

        let Message::Notification(n) = msg else {
            panic!("Expected Notification");
        };
        assert_eq!(n.method, "notify_status_update");
        assert_eq!(n.params, json!({"extruder": {"temperature": 210.0}}));
    }

    #[test]
    fn test_parse_notification_without_params() {
        let msg = Message::parse(r#"{"method":"notify_klippy_shutdown"}"#)
            .unwrap()
            .unwrap();
        let Message::Notification(n) = msg else {
            panic!("Expected Notification");
        };
        assert_eq!(n.method, "notify_klippy_shutdown");
        assert_eq!(n.params, json!({}));
    }

    #[test]
    fn test_parse_notification_with_empty_params_array() {
        let msg = Message::parse(r#"{"method":"notify_klippy_ready","params":[]}"#)
            .unwrap()
            .unwrap();
        let Message::Notification(n) = msg else {
            panic!("Expected Notification");
        };
        assert_eq!(n.params, json!({}));
    }

    #[test]
    fn test_parse_method_wins_over_id() {
        let msg = Message::parse(r#"{"method":"notify_gcode_response","id":3,"params":["ok"]}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, Message::Notification(n) if n.params == json!("ok")));
    }

    #[test]
    fn test_parse_success_response() {
        let msg = Message::parse(r#"{"jsonrpc":"2.0","result":"ok","id":4}"#)
            .unwrap()
            .unwrap();
        let Message::Response(resp) = msg else {
            panic!("Expected Response");
        };
        assert_eq!(resp.id, 4);
        assert_eq!(resp.into_result().unwrap(), json!("ok"));
    }

    #[test]
    fn test_parse_error_response() {
        let msg = Message::parse(
            r#"{"jsonrpc":"2.0","error":{"code":400,"message":"Klippy Disconnected"},"id":9}"#,
        )
        .unwrap()
        .unwrap();
        let Message::Response(resp) = msg else {
            panic!("Expected Response");
        };
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, 400);
        assert_eq!(err.message, "Klippy Disconnected");
    }

    #[test]
    fn test_parse_error_response_without_code() {
        let msg = Message::parse(r#"{"error":{"message":"boom"},"id":1}"#)
            .unwrap()
            .unwrap();
        let Message::Response(resp) = msg else {
            panic!("Expected Response");
        };
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_response_without_result_yields_null() {
        let resp = Response {
            id: 1,
            result: None,
            error: None,
        };
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_unclassifiable_frames() {
        assert!(Message::parse(r#"{"jsonrpc":"2.0"}"#).unwrap().is_none());
        assert!(Message::parse(r#"{"id":"abc","result":1}"#).unwrap().is_none());
        assert!(Message::parse("[1,2,3]").unwrap().is_none());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(Message::parse("not json").is_err());
    }

    #[test]
    fn test_connected_pseudo_notification() {
        let n = Notification::connected();
        assert_eq!(n.method, CONNECTED_METHOD);
        assert_eq!(n.params, json!({}));
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::new(-32601, "Method not found");
        assert_eq!(err.to_string(), "RPC error -32601: Method not found");
    }
}
