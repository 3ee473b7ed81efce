//! JSON-RPC 2.0 envelopes and the `caip-x` framing shared by both channels.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ports::ProviderError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Message type tag the wallet expects around every multichain envelope.
pub const CAIP_X_MESSAGE_TYPE: &str = "caip-x";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    /// Raw id as sent by the wallet. Only unsigned integers can match a pending request.
    pub id: Value,
    pub outcome: Result<Value, JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_u64()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    /// A frame without an id, forwarded untouched to subscribers.
    Notification(Value),
}

pub fn wrap_caip_x(request: &JsonRpcRequest) -> Value {
    serde_json::json!({
        "type": CAIP_X_MESSAGE_TYPE,
        "data": request,
    })
}

/// Extracts the envelope from a `{type: "caip-x", data}` frame.
pub fn unwrap_caip_x(raw: &Value) -> Result<&Value, ProviderError> {
    let frame = raw
        .as_object()
        .ok_or_else(|| ProviderError::MalformedMessage(format!("frame is not an object: {raw}")))?;
    if let Some(kind) = frame.get("type") {
        if kind.as_str() != Some(CAIP_X_MESSAGE_TYPE) {
            return Err(ProviderError::MalformedMessage(format!(
                "unexpected frame type: {kind}"
            )));
        }
    }
    frame
        .get("data")
        .ok_or_else(|| ProviderError::MalformedMessage("frame has no data field".to_owned()))
}

/// Classifies an unwrapped envelope as a response or a notification.
pub fn classify_envelope(data: &Value) -> Result<IncomingMessage, ProviderError> {
    let object = data.as_object().ok_or_else(|| {
        ProviderError::MalformedMessage(format!("envelope is not an object: {data}"))
    })?;

    match object.get("id") {
        None | Some(Value::Null) => classify_notification(object, data),
        Some(id) => classify_response(id, object),
    }
}

fn classify_notification(
    object: &Map<String, Value>,
    data: &Value,
) -> Result<IncomingMessage, ProviderError> {
    if !object.get("method").is_some_and(Value::is_string) {
        return Err(ProviderError::MalformedMessage(
            "envelope has neither id nor method".to_owned(),
        ));
    }
    Ok(IncomingMessage::Notification(data.clone()))
}

fn classify_response(
    id: &Value,
    object: &Map<String, Value>,
) -> Result<IncomingMessage, ProviderError> {
    if !(id.is_u64() || id.is_i64() || id.is_string()) {
        return Err(ProviderError::MalformedMessage(format!(
            "invalid response id: {id}"
        )));
    }
    if let Some(version) = object.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Err(ProviderError::MalformedMessage(format!(
                "unsupported jsonrpc version: {version}"
            )));
        }
    }

    let outcome = match (object.get("result"), object.get("error")) {
        (Some(result), None) => Ok(result.clone()),
        (None, Some(error)) => Err(serde_json::from_value::<JsonRpcErrorObject>(error.clone())
            .map_err(|e| ProviderError::MalformedMessage(format!("invalid error object: {e}")))?),
        (Some(_), Some(_)) => {
            return Err(ProviderError::MalformedMessage(
                "response carries both result and error".to_owned(),
            ))
        }
        (None, None) => {
            return Err(ProviderError::MalformedMessage(
                "response carries neither result nor error".to_owned(),
            ))
        }
    };

    Ok(IncomingMessage::Response(JsonRpcResponse {
        id: id.clone(),
        outcome,
    }))
}
