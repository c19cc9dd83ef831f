//! Typed bridge configuration.
//!
//! The whole configuration is immutable for the lifetime of a snapshot:
//! a reload parses and validates a complete new value, rebuilds the tool
//! registry off the request path, and swaps both in atomically.

use serde::Deserialize;

/// Minimum accepted length for an inline API specification. Anything shorter
/// cannot be a usable OpenAPI document.
pub const MIN_API_SPECIFICATION_LEN: usize = 50;

const DEFAULT_SERVER_NAME: &str = "kong-mcp";
const DEFAULT_SERVER_VERSION: &str = "1.0.0";
const DEFAULT_MAX_TOOLS: usize = 1000;
const DEFAULT_ENDPOINT_PATH: &str = "/mcp";

/// Root configuration: server settings plus the routed upstreams whose
/// OpenAPI descriptions become MCP tools.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub routes: Vec<RouteToolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_server_version")]
    pub server_version: String,
    #[serde(default = "default_max_tools")]
    pub max_tools: usize,
    /// HTTP path the MCP endpoint is served on.
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_name: default_server_name(),
            server_version: default_server_version(),
            max_tools: default_max_tools(),
            endpoint_path: default_endpoint_path(),
            oauth: OAuthConfig::default(),
        }
    }
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

fn default_server_version() -> String {
    DEFAULT_SERVER_VERSION.to_string()
}

const fn default_max_tools() -> usize {
    DEFAULT_MAX_TOOLS
}

fn default_endpoint_path() -> String {
    DEFAULT_ENDPOINT_PATH.to_string()
}

// Serde `default = "..."` attributes need a function path, not a literal.
const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Authorization server base URLs (or direct JWKS URLs).
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// When set, the token's `aud` claim must contain this value.
    #[serde(default)]
    pub audience: Option<String>,
    /// Scopes every accepted token must carry.
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub token_validation: TokenValidation,
    /// Filter tool visibility by the OpenAPI security scopes of each
    /// operation (in addition to per-route access control, which always
    /// applies).
    #[serde(default)]
    pub tool_scope_filtering: bool,
    /// RFC 7662 introspection endpoint. Required when `token_validation`
    /// is `introspection`.
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub introspection_client_id: Option<String>,
    #[serde(default)]
    pub introspection_client_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenValidation {
    #[default]
    Jwt,
    Introspection,
}

/// One routed upstream with an attached OpenAPI description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteToolConfig {
    pub route_id: String,
    pub route_name: String,
    /// Absolute base URL of the upstream this route proxies to,
    /// e.g. `http://admin-api:8001`.
    pub upstream_base_path: String,
    /// Inline JSON-encoded OpenAPI 3.x or Swagger 2.0 document.
    pub api_specification: String,
    /// Tool name prefix; defaults to the route name.
    #[serde(default)]
    pub tool_prefix: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub access_control: Option<AccessControlConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlConfig {
    /// Requirements applied to every tool of the route.
    #[serde(default)]
    pub default_requirements: Vec<ClaimRequirement>,
    /// Per-operation overrides, matched by `operation_id`. A match replaces
    /// the default requirements wholesale.
    #[serde(default)]
    pub per_operation_requirements: Vec<ClaimRequirement>,
}

/// A predicate over a verified claim set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequirement {
    pub claim_name: String,
    #[serde(default)]
    pub claim_values: Vec<String>,
    #[serde(default)]
    pub match_type: MatchType,
    /// Only meaningful inside `per_operation_requirements`.
    #[serde(default)]
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Any,
    All,
}

/// Load-time validation. Failures here abort startup (or leave the previous
/// snapshot in place on reload); per-route OpenAPI problems are handled later
/// and only disable the affected route.
pub fn validate_config(cfg: &BridgeConfig) -> anyhow::Result<()> {
    use anyhow::bail;
    use std::collections::HashSet;

    if !cfg.server.endpoint_path.starts_with('/') {
        bail!(
            "server.endpointPath must start with '/', got '{}'",
            cfg.server.endpoint_path
        );
    }

    let oauth = &cfg.server.oauth;
    if oauth.enabled {
        match oauth.token_validation {
            TokenValidation::Jwt => {
                if oauth.authorization_servers.is_empty() {
                    bail!("oauth.tokenValidation=jwt requires at least one authorization server");
                }
            }
            TokenValidation::Introspection => {
                if oauth.introspection_endpoint.is_none() {
                    bail!(
                        "oauth.tokenValidation=introspection requires oauth.introspectionEndpoint"
                    );
                }
            }
        }
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for route in &cfg.routes {
        let id = route.route_id.trim();
        if id.is_empty() {
            bail!("routes entries must have a non-empty routeId");
        }
        if !seen_ids.insert(id) {
            bail!("duplicate routeId '{id}'");
        }
        if route.route_name.trim().is_empty() {
            bail!("routes.{id}.routeName must be non-empty");
        }
        if !route.upstream_base_path.starts_with("http://")
            && !route.upstream_base_path.starts_with("https://")
        {
            bail!("routes.{id}.upstreamBasePath must be an absolute http(s) URL");
        }
        if route.api_specification.len() < MIN_API_SPECIFICATION_LEN {
            bail!(
                "routes.{id}.apiSpecification must be at least {MIN_API_SPECIFICATION_LEN} \
                 characters ({} given)",
                route.api_specification.len()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_route(id: &str) -> RouteToolConfig {
        RouteToolConfig {
            route_id: id.to_string(),
            route_name: "admin".to_string(),
            upstream_base_path: "http://127.0.0.1:8001".to_string(),
            api_specification: r#"{"openapi":"3.0.0","paths":{"/status":{"get":{}}}}"#.to_string(),
            tool_prefix: None,
            enabled: true,
            access_control: None,
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg: BridgeConfig = serde_yaml::from_str("{}").expect("valid yaml");
        assert_eq!(cfg.server.server_name, "kong-mcp");
        assert_eq!(cfg.server.server_version, "1.0.0");
        assert_eq!(cfg.server.max_tools, 1000);
        assert_eq!(cfg.server.endpoint_path, "/mcp");
        assert!(!cfg.server.oauth.enabled);
        assert_eq!(cfg.server.oauth.token_validation, TokenValidation::Jwt);
        assert!(!cfg.server.oauth.tool_scope_filtering);
    }

    #[test]
    fn route_enabled_defaults_true() {
        let cfg: BridgeConfig = serde_yaml::from_str(
            r#"
routes:
  - routeId: r1
    routeName: admin
    upstreamBasePath: http://127.0.0.1:8001
    apiSpecification: '{"openapi":"3.0.0","paths":{"/status":{"get":{}}}}'
"#,
        )
        .expect("valid yaml");
        assert!(cfg.routes[0].enabled);
        assert!(cfg.routes[0].tool_prefix.is_none());
    }

    #[test]
    fn requirement_match_type_defaults_to_any() {
        let req: ClaimRequirement = serde_yaml::from_str(
            r#"
claimName: permissions
claimValues: ["kong:read"]
"#,
        )
        .expect("valid yaml");
        assert_eq!(req.match_type, MatchType::Any);
        assert!(req.operation_id.is_none());
    }

    #[test]
    fn rejects_short_api_specification() {
        let mut cfg = BridgeConfig::default();
        let mut route = minimal_route("r1");
        route.api_specification = "{}".to_string();
        cfg.routes.push(route);
        let err = validate_config(&cfg).expect_err("must reject");
        assert!(err.to_string().contains("apiSpecification"));
    }

    #[test]
    fn rejects_duplicate_route_ids() {
        let mut cfg = BridgeConfig::default();
        cfg.routes.push(minimal_route("r1"));
        cfg.routes.push(minimal_route("r1"));
        let err = validate_config(&cfg).expect_err("must reject");
        assert!(err.to_string().contains("duplicate routeId"));
    }

    #[test]
    fn rejects_relative_upstream_base_path() {
        let mut cfg = BridgeConfig::default();
        let mut route = minimal_route("r1");
        route.upstream_base_path = "/admin-api".to_string();
        cfg.routes.push(route);
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn introspection_requires_endpoint() {
        let mut cfg = BridgeConfig::default();
        cfg.server.oauth.enabled = true;
        cfg.server.oauth.token_validation = TokenValidation::Introspection;
        let err = validate_config(&cfg).expect_err("must reject");
        assert!(err.to_string().contains("introspectionEndpoint"));

        cfg.server.oauth.introspection_endpoint = Some("http://as/introspect".to_string());
        validate_config(&cfg).expect("accepted with endpoint");
    }

    #[test]
    fn jwt_requires_authorization_servers() {
        let mut cfg = BridgeConfig::default();
        cfg.server.oauth.enabled = true;
        assert!(validate_config(&cfg).is_err());

        cfg.server.oauth.authorization_servers = vec!["http://as".to_string()];
        validate_config(&cfg).expect("accepted with server");
    }
}
