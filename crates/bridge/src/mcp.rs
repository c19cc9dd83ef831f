//! The MCP HTTP endpoint: capability discovery on GET, JSON-RPC on POST.
//!
//! There is no per-client session state: `initialize` is idempotent, and
//! every request carrying an id is authenticated (when OAuth is enabled) and
//! served against the registry snapshot visible when it began. Notifications
//! are acknowledged without a body, and therefore without an auth verdict.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tracing::Instrument as _;

use crate::access::ClaimSet;
use crate::auth::AuthValidator;
use crate::config::BridgeConfig;
use crate::registry::{Caller, ToolRecord, ToolRegistry};
use crate::rpc::{self, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::dispatch;

/// MCP protocol revision advertised by `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Hard cap on request bodies; MCP tool calls are small.
const MAX_POST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Immutable view served to requests: configuration plus the registry built
/// from it. Replaced as a whole on reload.
pub struct Snapshot {
    pub config: BridgeConfig,
    pub registry: ToolRegistry,
}

impl Snapshot {
    pub fn from_config(config: BridgeConfig) -> Snapshot {
        let registry = ToolRegistry::build(&config);
        Snapshot { config, registry }
    }
}

pub struct McpState {
    snapshot: parking_lot::RwLock<Arc<Snapshot>>,
    pub upstream_http: reqwest::Client,
    pub auth: AuthValidator,
}

impl McpState {
    pub fn new(
        snapshot: Snapshot,
        upstream_http: reqwest::Client,
        auth_http: reqwest::Client,
    ) -> McpState {
        McpState {
            snapshot: parking_lot::RwLock::new(Arc::new(snapshot)),
            upstream_http,
            auth: AuthValidator::new(auth_http),
        }
    }

    /// The snapshot visible to one request: old value in full or new value
    /// in full, never a mix.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Atomically install a freshly built snapshot (config reload).
    pub fn install(&self, snapshot: Snapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }
}

/// Data-plane router. The endpoint path is fixed at startup; reloads swap
/// config and registry but not the route table.
pub fn router(state: Arc<McpState>, endpoint_path: &str) -> axum::Router {
    axum::Router::new()
        .route(
            endpoint_path,
            axum::routing::get(get_mcp).post(post_mcp),
        )
        .layer(DefaultBodyLimit::max(MAX_POST_BODY_BYTES))
        .with_state(state)
}

/// GET: capability advertisement.
async fn get_mcp(State(state): State<Arc<McpState>>) -> Response {
    let snapshot = state.snapshot();
    let server = &snapshot.config.server;
    axum::Json(serde_json::json!({
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": server.server_name,
            "version": server.server_version,
        },
    }))
    .into_response()
}

async fn post_mcp(
    State(state): State<Arc<McpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match rpc::parse_request(&body) {
        Ok(request) => request,
        Err(error) => return rpc_response(StatusCode::OK, &error),
    };

    let span = tracing::info_span!(
        "bridge.mcp.post",
        method = %request.method,
        notification = request.is_notification(),
    );
    handle_post(&state, &headers, request).instrument(span).await
}

async fn handle_post(
    state: &Arc<McpState>,
    headers: &HeaderMap,
    request: JsonRpcRequest,
) -> Response {
    let snapshot = state.snapshot();
    let oauth = &snapshot.config.server.oauth;

    // Notifications never produce a response body, so they short-circuit
    // ahead of the auth gate: there is no reply to carry a 401 in.
    if request.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }

    // Authenticate before dispatch. With OAuth disabled the caller is
    // anonymous and every tool is unrestricted.
    let claims: Option<ClaimSet> = if oauth.enabled {
        let outcome = match bearer_token(headers) {
            Some(token) => state.auth.validate(oauth, token).await,
            None => Err(crate::auth::AuthError::MissingToken),
        };
        match outcome {
            Ok(claims) => Some(claims),
            Err(error) => {
                tracing::warn!(method = %request.method, error = %error, "authentication failed");
                return auth_failed_response(headers, request.response_id(), &error);
            }
        }
    } else {
        None
    };

    let id = request.response_id();
    let caller = match &claims {
        None => Caller::Unrestricted,
        Some(claims) => Caller::Authenticated {
            claims,
            scope_filtering: oauth.tool_scope_filtering,
        },
    };

    match request.method.as_str() {
        "initialize" => rpc_response(
            StatusCode::OK,
            &JsonRpcResponse::ok(id, initialize_result(&snapshot)),
        ),
        // Tolerated with an id too: accepted, no response body.
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => {
            let tools: Vec<Value> = snapshot
                .registry
                .list(caller)
                .into_iter()
                .map(tool_projection)
                .collect();
            rpc_response(
                StatusCode::OK,
                &JsonRpcResponse::ok(id, serde_json::json!({ "tools": tools })),
            )
        }
        "tools/call" => handle_tools_call(state, &snapshot, caller, id, request.params).await,
        other => rpc_response(
            StatusCode::OK,
            &JsonRpcResponse::err(
                id,
                JsonRpcError::with_detail(
                    rpc::METHOD_NOT_FOUND,
                    "Method not found",
                    format!("Unsupported method: {other}"),
                ),
            ),
        ),
    }
}

async fn handle_tools_call(
    state: &Arc<McpState>,
    snapshot: &Snapshot,
    caller: Caller<'_>,
    id: Value,
    params: Option<Value>,
) -> Response {
    let params = params.as_ref().and_then(Value::as_object);

    let Some(name) = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
    else {
        return rpc_response(
            StatusCode::OK,
            &JsonRpcResponse::err(
                id,
                JsonRpcError::with_detail(rpc::INVALID_PARAMS, "Invalid params", "Missing tool name"),
            ),
        );
    };

    let arguments: Map<String, Value> = match params.and_then(|p| p.get("arguments")) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return rpc_response(
                StatusCode::OK,
                &JsonRpcResponse::err(
                    id,
                    JsonRpcError::with_detail(
                        rpc::INVALID_PARAMS,
                        "Invalid params",
                        "Tool arguments must be an object",
                    ),
                ),
            );
        }
    };

    // Missing and forbidden are deliberately indistinguishable on the wire.
    let Ok(tool) = snapshot.registry.lookup(name, caller) else {
        return rpc_response(
            StatusCode::NOT_FOUND,
            &JsonRpcResponse::err(
                id,
                JsonRpcError::new(rpc::AUTH_FAILED, "Tool not found or access denied"),
            ),
        );
    };

    match dispatch::execute(&state.upstream_http, tool, &arguments).await {
        Ok(result) => rpc_response(StatusCode::OK, &JsonRpcResponse::ok(id, result)),
        // A registry record that cannot form a request is a broken invariant,
        // not an upstream failure.
        Err(error @ dispatch::DispatchError::InvalidRequest(_)) => {
            tracing::error!(tool = %tool.name, error = %error, "tool record cannot be dispatched");
            rpc_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &JsonRpcResponse::err(
                    id,
                    JsonRpcError::with_detail(
                        rpc::INTERNAL_ERROR,
                        "Internal error",
                        error.to_string(),
                    ),
                ),
            )
        }
        Err(error) => {
            tracing::warn!(tool = %tool.name, error = %error, "upstream tool call failed");
            rpc_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &JsonRpcResponse::err(
                    id,
                    JsonRpcError::with_detail(
                        rpc::TOOL_EXECUTION_FAILED,
                        "Tool execution failed",
                        error.to_string(),
                    ),
                ),
            )
        }
    }
}

fn initialize_result(snapshot: &Snapshot) -> Value {
    let server = &snapshot.config.server;
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": server.server_name,
            "version": server.server_version,
        },
    })
}

/// The MCP-visible projection of a tool: execution metadata stays internal.
fn tool_projection(tool: &ToolRecord) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": tool.input_schema,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn auth_failed_response(
    headers: &HeaderMap,
    id: Value,
    error: &crate::auth::AuthError,
) -> Response {
    let body = JsonRpcResponse::err(
        id,
        JsonRpcError::with_detail(rpc::AUTH_FAILED, "Authentication failed", error.to_string()),
    );
    let mut response = rpc_response(StatusCode::UNAUTHORIZED, &body);
    if let Ok(value) = HeaderValue::from_str(&www_authenticate(headers)) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// `WWW-Authenticate` pointing at the protected-resource metadata for this
/// host. Scheme comes from `X-Forwarded-Proto` when a fronting proxy sets
/// it; the core itself only speaks plain HTTP.
fn www_authenticate(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("Bearer resource_metadata=\"{scheme}://{host}/.well-known/oauth-protected-resource\"")
}

fn rpc_response(status: StatusCode, body: &JsonRpcResponse) -> Response {
    (status, axum::Json(body)).into_response()
}
