//! JSON-RPC 2.0 envelope: request parsing/validation and response encoding.

use serde::Serialize;
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Authentication failure, and tool-not-found/forbidden (indistinguishable
/// by design so tool names don't leak across identities).
pub const AUTH_FAILED: i64 = -32001;
pub const TOOL_EXECUTION_FAILED: i64 = -32003;

/// A validated JSON-RPC request. `id == None` means notification.
#[derive(Debug, Clone)]
pub struct JsonRpcRequest {
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The id to echo in a response (`null` for notifications).
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// An error whose `data` carries a machine-readable `detail` string.
    pub fn with_detail(
        code: i64,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> JsonRpcError {
        JsonRpcError {
            code,
            message: message.into(),
            data: Some(serde_json::json!({ "detail": detail.into() })),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub const fn ok(id: Value, result: Value) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub const fn err(id: Value, error: JsonRpcError) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

fn is_valid_id(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Null)
}

/// Parse a UTF-8 body into a request.
///
/// Invalid JSON yields `-32700`; a structurally broken envelope (wrong
/// `jsonrpc`, missing `method`, wrong-type `id`/`params`) yields `-32600`.
/// The error response echoes the request id when one could be extracted.
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        JsonRpcResponse::err(
            Value::Null,
            JsonRpcError::with_detail(PARSE_ERROR, "Parse error", e.to_string()),
        )
    })?;

    let Some(obj) = value.as_object() else {
        return Err(invalid_request(Value::Null, "Request must be a JSON object"));
    };

    // A present-but-wrong-type id cannot be echoed back; fall back to null.
    let id = match obj.get("id") {
        None => None,
        Some(v) if is_valid_id(v) => Some(v.clone()),
        Some(_) => {
            return Err(invalid_request(
                Value::Null,
                "Request id must be a string, number or null",
            ));
        }
    };
    let echo_id = id.clone().unwrap_or(Value::Null);

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(invalid_request(echo_id, "jsonrpc must be \"2.0\""));
    }

    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err(invalid_request(echo_id, "Missing method"));
    };

    let params = match obj.get("params") {
        None => None,
        Some(v @ (Value::Object(_) | Value::Array(_))) => Some(v.clone()),
        Some(_) => {
            return Err(invalid_request(
                echo_id,
                "params must be an object or array",
            ));
        }
    };

    Ok(JsonRpcRequest {
        id,
        method: method.to_string(),
        params,
    })
}

fn invalid_request(id: Value, detail: &str) -> JsonRpcResponse {
    JsonRpcResponse::err(
        id,
        JsonRpcError::with_detail(INVALID_REQUEST, "Invalid Request", detail),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn err_code(resp: &JsonRpcResponse) -> i64 {
        resp.error.as_ref().expect("error").code
    }

    #[test]
    fn parses_a_request_with_params() {
        let req = parse_request(
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {} })
                .to_string()
                .as_bytes(),
        )
        .expect("valid request");
        assert_eq!(req.method, "tools/list");
        assert_eq!(req.id, Some(json!(1)));
        assert!(!req.is_notification());
    }

    #[test]
    fn missing_id_is_a_notification() {
        let req = parse_request(
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
                .to_string()
                .as_bytes(),
        )
        .expect("valid notification");
        assert!(req.is_notification());
        assert_eq!(req.response_id(), Value::Null);
    }

    #[test]
    fn invalid_json_is_parse_error_with_null_id() {
        let resp = parse_request(b"{nope").expect_err("must fail");
        assert_eq!(err_code(&resp), PARSE_ERROR);
        assert_eq!(resp.id, Value::Null);
    }

    #[test]
    fn wrong_jsonrpc_version_is_invalid_request() {
        let resp = parse_request(
            json!({ "jsonrpc": "1.0", "id": 5, "method": "x" })
                .to_string()
                .as_bytes(),
        )
        .expect_err("must fail");
        assert_eq!(err_code(&resp), INVALID_REQUEST);
        // The extractable id is echoed.
        assert_eq!(resp.id, json!(5));
    }

    #[test]
    fn missing_method_is_invalid_request() {
        let resp = parse_request(json!({ "jsonrpc": "2.0", "id": 1 }).to_string().as_bytes())
            .expect_err("must fail");
        assert_eq!(err_code(&resp), INVALID_REQUEST);
    }

    #[test]
    fn wrong_type_id_is_invalid_request_with_null_id() {
        let resp = parse_request(
            json!({ "jsonrpc": "2.0", "id": {"x": 1}, "method": "x" })
                .to_string()
                .as_bytes(),
        )
        .expect_err("must fail");
        assert_eq!(err_code(&resp), INVALID_REQUEST);
        assert_eq!(resp.id, Value::Null);
    }

    #[test]
    fn wrong_type_params_is_invalid_request() {
        let resp = parse_request(
            json!({ "jsonrpc": "2.0", "id": 1, "method": "x", "params": "str" })
                .to_string()
                .as_bytes(),
        )
        .expect_err("must fail");
        assert_eq!(err_code(&resp), INVALID_REQUEST);
    }

    #[test]
    fn error_detail_lands_under_data() {
        let err = JsonRpcError::with_detail(INVALID_PARAMS, "Invalid params", "Missing tool name");
        let v = serde_json::to_value(JsonRpcResponse::err(json!(7), err)).expect("serialize");
        assert_eq!(v["error"]["code"], json!(INVALID_PARAMS));
        assert_eq!(v["error"]["data"]["detail"], json!("Missing tool name"));
        assert!(v.get("result").is_none());
    }
}
