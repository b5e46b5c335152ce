//! JSON-RPC 2.0 framing.
//!
//! Message shape is discriminated by key presence rather than blind untagged
//! deserialization: an object with `method` and no `id` is a notification,
//! with `id` and `method` a request, with `id` and exactly one of
//! `result`/`error` a response. Arrays are batches; an empty batch is an
//! invalid request.
//!
//! Encoding is compact (no superfluous whitespace); key order is unspecified.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::types::RequestId;

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Marker type that serializes as the literal string `"2.0"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// JSON-RPC request (expects a response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version marker
    pub jsonrpc: JsonRpcVersion,
    /// Request identifier, unique per sender for the connection lifetime
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters; absent and `null` both decode to `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a request serializing typed params.
    pub fn with_params<P: Serialize>(
        id: RequestId,
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, method, Some(serde_json::to_value(params)?)))
    }

    /// The `_meta` object inside `params`, if any.
    pub fn meta(&self) -> Option<&Value> {
        crate::types::meta::of_params(self.params.as_ref())
    }
}

/// JSON-RPC notification (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version marker
    pub jsonrpc: JsonRpcVersion,
    /// Method name
    pub method: String,
    /// Parameters; absent and `null` both decode to `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }

    /// Create a notification serializing typed params.
    pub fn with_params<P: Serialize>(
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(method, Some(serde_json::to_value(params)?)))
    }
}

/// JSON-RPC error object carried inside an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i32,
    /// Short human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response payload: exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful result
    Success {
        /// Result value
        result: Value,
    },
    /// Error outcome
    Error {
        /// Error object
        error: JsonRpcError,
    },
}

/// Response id: `null` only for parse-error responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<RequestId>);

impl ResponseId {
    /// Id for a normal response.
    pub fn from_request(id: RequestId) -> Self {
        Self(Some(id))
    }

    /// Null id, used when the request id could not be recovered.
    pub fn null() -> Self {
        Self(None)
    }
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version marker
    pub jsonrpc: JsonRpcVersion,
    /// Success or error payload
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Id of the request being answered
    pub id: ResponseId,
}

impl JsonRpcResponse {
    /// Successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id: ResponseId::from_request(id),
        }
    }

    /// Error response for a known request id.
    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId::from_request(id),
        }
    }

    /// Error response with `id: null`, for frames whose id is unrecoverable.
    pub fn error_detached(error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId::null(),
        }
    }

    /// The result value, if this is a success response.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// The error object, if this is an error response.
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }

    /// The answered request id, unless this is a detached (`null`-id) response.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.id.0.as_ref()
    }
}

/// One decoded JSON-RPC frame.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request
    Request(JsonRpcRequest),
    /// A response
    Response(JsonRpcResponse),
    /// A notification
    Notification(JsonRpcNotification),
    /// A batch of non-batch messages
    Batch(Vec<JsonRpcMessage>),
}

impl JsonRpcMessage {
    /// Decode a frame from raw text.
    ///
    /// Parse failures map to [`ProtocolError::InvalidJson`] (code −32700),
    /// structural failures to [`ProtocolError::InvalidRequest`] (code −32600).
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(ProtocolError::InvalidRequest("empty batch".to_string()));
                }
                let mut messages = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(obj) => messages.push(classify_object(obj)?),
                        other => {
                            return Err(ProtocolError::InvalidRequest(format!(
                                "batch element must be an object, got {other}"
                            )));
                        }
                    }
                }
                Ok(Self::Batch(messages))
            }
            Value::Object(obj) => classify_object(obj),
            other => Err(ProtocolError::InvalidRequest(format!(
                "message must be an object or array, got {other}"
            ))),
        }
    }

    /// Encode to compact JSON text.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) | Self::Batch(_) => None,
        }
    }

    /// True if this frame (or any batch element) is a request.
    pub fn contains_request(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Batch(items) => items.iter().any(Self::contains_request),
            Self::Response(_) | Self::Notification(_) => false,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        Self::Request(r)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(r: JsonRpcResponse) -> Self {
        Self::Response(r)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        Self::Notification(n)
    }
}

/// Discriminate one object by the `id`/`method`/`result`/`error` keys.
fn classify_object(obj: Map<String, Value>) -> Result<JsonRpcMessage, ProtocolError> {
    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(ProtocolError::InvalidRequest(format!(
                "unsupported jsonrpc version '{other}'"
            )));
        }
        None => {
            return Err(ProtocolError::InvalidRequest(
                "missing jsonrpc version".to_string(),
            ));
        }
    }

    let has_id = matches!(obj.get("id"), Some(v) if !v.is_null());
    let has_method = obj.contains_key("method");
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");
    let value = Value::Object(obj);

    if has_method {
        if has_id {
            let request: JsonRpcRequest = serde_json::from_value(value)
                .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
            Ok(JsonRpcMessage::Request(request))
        } else {
            let notification: JsonRpcNotification = serde_json::from_value(value)
                .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
            Ok(JsonRpcMessage::Notification(notification))
        }
    } else if has_result ^ has_error {
        let response: JsonRpcResponse = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
        Ok(JsonRpcMessage::Response(response))
    } else if has_result && has_error {
        Err(ProtocolError::InvalidRequest(
            "response carries both result and error".to_string(),
        ))
    } else {
        Err(ProtocolError::InvalidRequest(
            "object is neither request, response, nor notification".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decode_request() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{"cursor":"c"}}"#;
        let msg = JsonRpcMessage::decode(raw).unwrap();
        let JsonRpcMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "tools/list");
        assert_eq!(req.params, Some(json!({"cursor": "c"})));
    }

    #[test]
    fn decode_notification_without_id() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let msg = JsonRpcMessage::decode(raw).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn null_id_decodes_as_notification() {
        let raw = r#"{"jsonrpc":"2.0","id":null,"method":"notifications/progress"}"#;
        let msg = JsonRpcMessage::decode(raw).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn null_params_decode_as_absent() {
        let raw = r#"{"jsonrpc":"2.0","id":"a","method":"ping","params":null}"#;
        let JsonRpcMessage::Request(req) = JsonRpcMessage::decode(raw).unwrap() else {
            panic!("expected request");
        };
        assert!(req.params.is_none());
    }

    #[test]
    fn decode_success_and_error_responses() {
        let raw = r#"{"jsonrpc":"2.0","id":"x","result":{"ok":true}}"#;
        let JsonRpcMessage::Response(resp) = JsonRpcMessage::decode(raw).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.result(), Some(&json!({"ok": true})));

        let raw = r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#;
        let JsonRpcMessage::Response(resp) = JsonRpcMessage::decode(raw).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.error_object().unwrap().code, -32601);
    }

    #[test]
    fn reject_result_and_error_together() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":0,"message":""}}"#;
        assert!(matches!(
            JsonRpcMessage::decode(raw),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn reject_bad_json() {
        assert!(matches!(
            JsonRpcMessage::decode("{nope"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn reject_missing_version() {
        let raw = r#"{"id":1,"method":"ping"}"#;
        assert!(matches!(
            JsonRpcMessage::decode(raw),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn reject_fractional_id() {
        let raw = r#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#;
        assert!(matches!(
            JsonRpcMessage::decode(raw),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn empty_batch_is_invalid() {
        assert!(matches!(
            JsonRpcMessage::decode("[]"),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn batch_decodes_elements() {
        let raw = r#"[
            {"jsonrpc":"2.0","id":1,"method":"tools/list"},
            {"jsonrpc":"2.0","method":"notifications/initialized"}
        ]"#;
        let JsonRpcMessage::Batch(items) = JsonRpcMessage::decode(raw).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(items.len(), 2);
        assert!(items[0].contains_request());
        assert!(!items[1].contains_request());
    }

    #[test]
    fn encode_is_compact_and_round_trips() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo","_meta":{"progressToken":"p1","vendorKey":[1,2]}}}"#;
        let msg = JsonRpcMessage::decode(raw).unwrap();
        let encoded = msg.encode().unwrap();
        assert!(!encoded.contains('\n'));
        assert!(!encoded.contains(": "));

        // Round-trip up to key ordering: re-decode and compare values
        let original: Value = serde_json::from_str(raw).unwrap();
        let reencoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, reencoded);
    }

    #[test]
    fn meta_accessor_on_request() {
        let req = JsonRpcRequest::new(
            RequestId::from("r"),
            "tools/call",
            Some(json!({"_meta": {"progressToken": 3}})),
        );
        let meta = req.meta().unwrap();
        assert_eq!(
            crate::types::meta::progress_token(meta),
            Some(RequestId::Number(3))
        );
    }

    #[test]
    fn detached_error_has_null_id() {
        let resp = JsonRpcResponse::error_detached(JsonRpcError {
            code: -32600,
            message: "Invalid Request".to_string(),
            data: None,
        });
        let encoded = serde_json::to_value(&resp).unwrap();
        assert_eq!(encoded["id"], Value::Null);
    }
}
