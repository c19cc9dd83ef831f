//! The authoritative tool registry.
//!
//! Built once from the declarative configuration at load/reload time; the
//! request path only ever reads a snapshot. There is no call-time tool
//! registration.

use std::collections::BTreeMap;

use serde_json::Value;
use toolbridge_openapi_tools::spec::ApiDocument;
use toolbridge_openapi_tools::synth;

use crate::access::{self, ClaimSet};
use crate::config::{BridgeConfig, ClaimRequirement, RouteToolConfig};

/// One registered tool: the MCP-visible surface plus the execution binding
/// back onto the upstream route.
#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub http_method: String,
    /// Endpoint path template, with `{param}` placeholders.
    pub endpoint_path: String,
    pub route_id: String,
    pub route_name: String,
    /// Absolute upstream base URL, without a trailing slash.
    pub route_base_path: String,
    pub operation_id: Option<String>,
    pub access_requirements: Vec<ClaimRequirement>,
    /// OpenAPI security scopes; enforced only under scope filtering.
    pub scope_requirements: Vec<String>,
}

/// Caller identity, as the registry filters see it.
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    /// OAuth is disabled; every tool is unrestricted.
    Unrestricted,
    /// OAuth is enabled and this request carries a verified claim set.
    Authenticated {
        claims: &'a ClaimSet,
        scope_filtering: bool,
    },
}

impl Caller<'_> {
    fn allows(self, tool: &ToolRecord) -> bool {
        match self {
            Caller::Unrestricted => true,
            Caller::Authenticated {
                claims,
                scope_filtering,
            } => {
                access::requirements_satisfied(claims, &tool.access_requirements)
                    && (!scope_filtering
                        || access::scopes_satisfied(claims, &tool.scope_requirements))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    NotFound,
    Forbidden,
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolRecord>,
}

impl ToolRegistry {
    /// Build the registry from every enabled route.
    ///
    /// A route whose API specification fails to parse produces no tools and
    /// is logged; it never aborts the build. Duplicate names are dropped
    /// (first writer wins), and the registry is capped at
    /// `server.max_tools`.
    pub fn build(cfg: &BridgeConfig) -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        for route in cfg.routes.iter().filter(|r| r.enabled) {
            registry.add_route(route, cfg.server.max_tools);
        }
        registry
    }

    fn add_route(&mut self, route: &RouteToolConfig, max_tools: usize) {
        let doc = match ApiDocument::parse(&route.api_specification) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(
                    route_id = %route.route_id,
                    error = %e,
                    "invalid API specification; route produces no tools"
                );
                return;
            }
        };

        let prefix = route.tool_prefix.as_deref().unwrap_or(&route.route_name);
        let base_path = route.upstream_base_path.trim_end_matches('/').to_string();
        let mut added = 0usize;

        for def in synth::synthesize_tools(&doc, prefix) {
            if self.tools.len() >= max_tools {
                tracing::warn!(
                    route_id = %route.route_id,
                    tool = %def.name,
                    max_tools,
                    "tool limit reached; dropping tool"
                );
                continue;
            }
            if self.tools.contains_key(&def.name) {
                tracing::warn!(
                    route_id = %route.route_id,
                    tool = %def.name,
                    "duplicate tool name; keeping the first definition"
                );
                continue;
            }

            let access_requirements = resolve_requirements(route, def.operation_id.as_deref());
            self.tools.insert(
                def.name.clone(),
                ToolRecord {
                    name: def.name,
                    description: def.description,
                    input_schema: def.input_schema,
                    http_method: def.http_method.to_string(),
                    endpoint_path: def.endpoint_path,
                    route_id: route.route_id.clone(),
                    route_name: route.route_name.clone(),
                    route_base_path: base_path.clone(),
                    operation_id: def.operation_id,
                    access_requirements,
                    scope_requirements: def.scope_requirements,
                },
            );
            added += 1;
        }

        tracing::info!(
            route_id = %route.route_id,
            route_name = %route.route_name,
            tools = added,
            "registered route tools"
        );
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Tools visible to the caller, in stable (name) order.
    pub fn list(&self, caller: Caller<'_>) -> Vec<&ToolRecord> {
        self.tools
            .values()
            .filter(|t| caller.allows(t))
            .collect()
    }

    /// Look a tool up for execution. `Forbidden` and `NotFound` are reported
    /// separately here; the protocol layer collapses them into one error so
    /// callers cannot probe for hidden tool names.
    pub fn lookup(&self, name: &str, caller: Caller<'_>) -> Result<&ToolRecord, LookupError> {
        let tool = self.tools.get(name).ok_or(LookupError::NotFound)?;
        if caller.allows(tool) {
            Ok(tool)
        } else {
            Err(LookupError::Forbidden)
        }
    }
}

/// Route defaults, unless a per-operation entry names this operation; a
/// matching entry replaces the defaults wholesale.
fn resolve_requirements(
    route: &RouteToolConfig,
    operation_id: Option<&str>,
) -> Vec<ClaimRequirement> {
    let Some(ac) = &route.access_control else {
        return Vec::new();
    };
    if let Some(op_id) = operation_id
        && let Some(specific) = ac
            .per_operation_requirements
            .iter()
            .find(|r| r.operation_id.as_deref() == Some(op_id))
    {
        return vec![specific.clone()];
    }
    ac.default_requirements.clone()
}
