use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::TelemetryMethod;

use super::error::RpcError;

/// Longest slice of a bad body echoed back in a parse error.
const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: TelemetryMethod,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: TelemetryMethod, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl RpcResponse {
    pub fn from_body(body: &str) -> Result<Self, RpcError> {
        serde_json::from_str(body).map_err(|err| {
            RpcError::parse(format!(
                "failed to parse response ({err}): {}",
                excerpt(body)
            ))
        })
    }

    /// Unwraps the envelope into the method's payload type.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, RpcError> {
        if let Some(error) = self.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            return Err(RpcError::protocol(message));
        }

        let result = self
            .result
            .ok_or_else(|| RpcError::protocol("response carried neither result nor error"))?;

        serde_json::from_value(result)
            .map_err(|err| RpcError::parse(format!("unexpected result shape: {err}")))
    }
}

/// Hands out request ids, starting from the current epoch milliseconds.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        let seed = Utc::now().timestamp_millis().max(0) as u64;
        Self {
            next: AtomicU64::new(seed),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::VersionResponse;
    use crate::network::error::RpcErrorKind;
    use serde_json::json;

    #[test]
    fn request_serializes_as_jsonrpc_envelope() {
        let request = RpcRequest::new(7, TelemetryMethod::GetVersion, json!({}));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "jsonrpc": "2.0", "id": 7, "method": "get-version", "params": {} })
        );
    }

    #[test]
    fn error_member_becomes_protocol_error() {
        let response = RpcResponse::from_body(r#"{"error":{"code":-32601,"message":"no such method"}}"#)
            .unwrap();
        let err = response.into_result::<VersionResponse>().unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::ProtocolError);
        assert_eq!(err.message, "no such method");
    }

    #[test]
    fn error_without_message_keeps_its_json() {
        let response = RpcResponse::from_body(r#"{"error":{"code":1}}"#).unwrap();
        let err = response.into_result::<VersionResponse>().unwrap_err();
        assert_eq!(err.message, r#"{"code":1}"#);
    }

    #[test]
    fn empty_envelope_is_rejected() {
        let response = RpcResponse::from_body(r#"{"id":1}"#).unwrap();
        let err = response.into_result::<VersionResponse>().unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::ProtocolError);
    }

    #[test]
    fn wrong_result_shape_is_a_parse_error() {
        let response = RpcResponse::from_body(r#"{"result":{"release":"x"}}"#).unwrap();
        let err = response.into_result::<VersionResponse>().unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::ParseError);
    }

    #[test]
    fn garbage_body_is_a_parse_error() {
        let err = RpcResponse::from_body("<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::ParseError);
        assert!(err.message.contains("bad gateway"));
    }

    #[test]
    fn request_ids_increase() {
        let ids = RequestIds::new();
        let first = ids.next_id();
        assert_eq!(ids.next_id(), first + 1);
    }
}
