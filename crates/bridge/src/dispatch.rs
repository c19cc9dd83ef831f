//! Execution dispatcher: binds MCP call arguments onto the upstream HTTP
//! route and maps the response into an MCP `content` envelope.

use std::collections::HashSet;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::registry::ToolRecord;
use crate::timeouts;
use toolbridge_openapi_tools::convert::{PARAMETER_IN_KEY, ParamLocation};

/// Everything except unreserved characters is escaped inside a substituted
/// path segment, so argument values cannot alter the request path shape.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Transport-level dispatch failures. An HTTP response from the upstream
/// (whatever its status) is not a failure here; it is mapped into the MCP
/// result, with `isError` for non-2xx statuses.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("upstream request timed out after {0}s")]
    Timeout(u64),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("reading upstream response body failed: {0}")]
    BodyRead(String),
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

/// The fully bound upstream request, before transport.
#[derive(Debug)]
pub struct BoundRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Bind MCP arguments to the tool's route: substitute path placeholders,
/// collect query pairs and headers, and assemble the JSON body from the
/// arguments no declared parameter consumed (an explicit `body` argument
/// wins verbatim).
pub fn bind_request(tool: &ToolRecord, arguments: &Map<String, Value>) -> BoundRequest {
    let bindings = declared_bindings(&tool.input_schema);
    let mut consumed: HashSet<&str> = HashSet::new();

    let mut path = tool.endpoint_path.clone();
    let mut query = Vec::new();
    let mut headers = Vec::new();
    for (name, location) in &bindings {
        let Some(value) = arguments.get(name.as_str()) else {
            continue;
        };
        let rendered = stringify_argument(value);
        match location {
            ParamLocation::Path => {
                let placeholder = format!("{{{name}}}");
                let encoded = utf8_percent_encode(&rendered, PATH_SEGMENT).to_string();
                path = path.replace(&placeholder, &encoded);
            }
            ParamLocation::Query => query.push((name.clone(), rendered)),
            ParamLocation::Header => headers.push((name.clone(), rendered)),
        }
        consumed.insert(name.as_str());
    }

    let body = if accepts_body(&tool.http_method) && declares_body(&tool.input_schema) {
        match arguments.get("body") {
            Some(explicit) => Some(explicit.clone()),
            None => {
                let leftover: Map<String, Value> = arguments
                    .iter()
                    .filter(|(k, _)| !consumed.contains(k.as_str()) && *k != "body")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(Value::Object(leftover))
            }
        }
    } else {
        None
    };

    BoundRequest {
        url: format!("{}{}", tool.route_base_path, path),
        query,
        headers,
        body,
    }
}

/// Issue the bound request and shape the response as an MCP result.
pub async fn execute(
    client: &reqwest::Client,
    tool: &ToolRecord,
    arguments: &Map<String, Value>,
) -> Result<Value, DispatchError> {
    let bound = bind_request(tool, arguments);
    let timeout = timeouts::upstream_timeout();

    let method = reqwest::Method::from_bytes(tool.http_method.as_bytes())
        .map_err(|e| DispatchError::InvalidRequest(format!("method: {e}")))?;

    let mut request = client
        .request(method, bound.url.as_str())
        .timeout(timeout);
    if !bound.query.is_empty() {
        request = request.query(&bound.query);
    }
    for (name, value) in &bound.headers {
        let Ok(header_name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(tool = %tool.name, header = %name, "skipping invalid header name");
            continue;
        };
        let Ok(header_value) = reqwest::header::HeaderValue::from_str(value) else {
            tracing::warn!(tool = %tool.name, header = %name, "skipping invalid header value");
            continue;
        };
        request = request.header(header_name, header_value);
    }
    if let Some(body) = &bound.body {
        request = request.json(body);
    }

    tracing::debug!(
        tool = %tool.name,
        method = %tool.http_method,
        url = %bound.url,
        "dispatching upstream call"
    );

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            DispatchError::Timeout(timeout.as_secs())
        } else {
            DispatchError::Transport(e.to_string())
        }
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            DispatchError::Timeout(timeout.as_secs())
        } else {
            DispatchError::BodyRead(e.to_string())
        }
    })?;

    Ok(shape_result(status, &bytes))
}

fn shape_result(status: reqwest::StatusCode, body: &[u8]) -> Value {
    if status.is_success() {
        // JSON bodies are re-encoded canonically; everything else passes raw.
        let text = match serde_json::from_slice::<Value>(body) {
            Ok(parsed) => serde_json::to_string(&parsed).unwrap_or_default(),
            Err(_) => String::from_utf8_lossy(body).to_string(),
        };
        serde_json::json!({ "content": [ { "type": "text", "text": text } ] })
    } else {
        let text = format!(
            "HTTP {} Error: {}",
            status.as_u16(),
            String::from_utf8_lossy(body)
        );
        serde_json::json!({
            "content": [ { "type": "text", "text": text } ],
            "isError": true,
        })
    }
}

fn accepts_body(method: &str) -> bool {
    matches!(method, "POST" | "PUT" | "PATCH")
}

fn declares_body(input_schema: &Value) -> bool {
    input_schema
        .pointer("/properties/body")
        .is_some_and(Value::is_object)
}

/// Parameter bindings recorded on the input schema at synthesis time.
fn declared_bindings(input_schema: &Value) -> Vec<(String, ParamLocation)> {
    let Some(properties) = input_schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    properties
        .iter()
        .filter_map(|(name, schema)| {
            let location = schema
                .get(PARAMETER_IN_KEY)
                .and_then(Value::as_str)
                .and_then(ParamLocation::parse)?;
            Some((name.clone(), location))
        })
        .collect()
}

fn stringify_argument(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
        other => other.to_string(),
    }
}
