//! JSON-RPC 2.0 payload helpers for the stdio transport.
//!
//! Framing is strictly newline-delimited JSON. `Content-Length` framing is
//! never mixed onto the same connection; auto-detecting between the two on
//! one pipe is how clients stall.

use serde::Deserialize;
use serde_json::{Value, json};

/// Protocol date sent in `initialize`. Servers answering with older dates
/// (e.g. `2024-11-05`) are still accepted.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub fn initialize_request(id: i64, client_name: &str, client_version: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_name,
                "version": client_version,
            }
        }
    })
}

pub fn initialized_notification() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized",
    })
}

/// `tools/list` request; `params: None` omits the field entirely.
pub fn tools_list_request(id: i64, params: Option<Value>) -> Value {
    match params {
        Some(params) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/list",
            "params": params,
        }),
        None => json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/list",
        }),
    }
}

/// Error object inside a JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// The half of a response the inspector cares about.
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

/// True when a response `id` equals the integer we sent.
///
/// Some servers echo integer ids back as floats (`1.0`); both spellings
/// count as a match.
pub fn id_matches(value: &Value, expected: i64) -> bool {
    let Some(id) = value.get("id") else {
        return false;
    };
    if let Some(n) = id.as_i64() {
        return n == expected;
    }
    if let Some(f) = id.as_f64() {
        return f == expected as f64;
    }
    false
}

/// Interpret one stdout line as a response to `expected`.
///
/// Non-JSON noise and unrelated messages yield `None`; scanning continues.
pub fn parse_reply(line: &str, expected: i64) -> Option<RpcReply> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    if !id_matches(&value, expected) {
        return None;
    }
    let error = value
        .get("error")
        .and_then(|e| serde_json::from_value(e.clone()).ok());
    Some(RpcReply {
        result: value.get("result").cloned(),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_and_float_ids_both_match() {
        let int_id: Value = serde_json::from_str(r#"{"id":1,"result":{}}"#).unwrap();
        let float_id: Value = serde_json::from_str(r#"{"id":1.0,"result":{}}"#).unwrap();
        assert!(id_matches(&int_id, 1));
        assert!(id_matches(&float_id, 1));
        assert!(!id_matches(&int_id, 2));
    }

    #[test]
    fn noise_and_unrelated_lines_are_skipped() {
        assert!(parse_reply("Serving dashboard on :9999", 1).is_none());
        assert!(parse_reply(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#, 1).is_none());
        assert!(parse_reply(r#"{"jsonrpc":"2.0","method":"log","params":{}}"#, 1).is_none());
    }

    #[test]
    fn reply_carries_error_object() {
        let reply = parse_reply(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"bad params"}}"#,
            3,
        )
        .unwrap();
        let error = reply.error.unwrap();
        assert_eq!(error.code, -32602);
        assert_eq!(error.message, "bad params");
        assert!(reply.result.is_none());
    }

    #[test]
    fn tools_list_request_can_omit_params() {
        let with = tools_list_request(3, Some(serde_json::json!({})));
        let without = tools_list_request(3, None);
        assert!(with.get("params").is_some());
        assert!(without.get("params").is_none());
    }
}
