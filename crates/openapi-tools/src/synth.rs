//! MCP tool synthesis: names, descriptions and input schemas for operations.

use serde_json::{Map, Value};

use crate::convert::{self, ConvertedParameter};
use crate::spec::{ApiDocument, HttpMethod, Operation};

/// Maximum length of a synthesised tool name.
pub const MAX_TOOL_NAME_LEN: usize = 128;

/// A synthesised MCP tool, ready to be registered.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub http_method: &'static str,
    pub endpoint_path: String,
    pub operation_id: Option<String>,
    /// OAuth scopes named by the operation's `security` requirements (or the
    /// document-level default). Only enforced when scope filtering is on.
    pub scope_requirements: Vec<String>,
}

/// Synthesise one tool per enumerated operation.
pub fn synthesize_tools(doc: &ApiDocument, prefix: &str) -> Vec<ToolDefinition> {
    doc.operations()
        .into_iter()
        .map(|op| synthesize_tool(doc, prefix, &op))
        .collect()
}

fn synthesize_tool(doc: &ApiDocument, prefix: &str, op: &Operation) -> ToolDefinition {
    let parameters: Vec<ConvertedParameter> = op
        .parameters
        .iter()
        .filter_map(|p| convert::convert_parameter(doc.root(), p))
        .collect();
    let body = op
        .request_body
        .as_ref()
        .and_then(|b| convert::convert_request_body(doc.root(), b));

    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();
    for p in &parameters {
        if p.required && !properties.contains_key(&p.name) {
            required.push(Value::String(p.name.clone()));
        }
        properties.insert(p.name.clone(), p.schema.clone());
    }
    if let Some(body) = &body {
        properties.insert("body".to_string(), body.schema.clone());
        if body.required {
            required.push(Value::String("body".to_string()));
        }
    }

    let input_schema = serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    });

    ToolDefinition {
        name: tool_name(prefix, op.method, &op.path),
        description: describe_operation(op),
        input_schema,
        http_method: op.method.as_str(),
        endpoint_path: op.path.clone(),
        operation_id: op.operation_id.clone(),
        scope_requirements: security_scopes(doc, op),
    }
}

/// Deterministic tool name for a `(prefix, method, path)` triple.
///
/// The result matches `^[a-z0-9_-]+$` and is capped at
/// [`MAX_TOOL_NAME_LEN`] characters.
pub fn tool_name(prefix: &str, method: HttpMethod, path: &str) -> String {
    let raw = format!("{prefix}_{}_{}", method.key(), simplify_path(path)).to_lowercase();
    sanitize_name(&raw)
}

/// Reduce an endpoint path to a name fragment: `/plugins/{id}` → `plugins_id`.
fn simplify_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.trim_start_matches('/').chars() {
        match ch {
            '{' | '}' => {}
            '/' => out.push('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            _ => out.push('_'),
        }
    }
    let collapsed = collapse_separator_runs(&out);
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.to_string()
    }
}

fn sanitize_name(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let collapsed = collapse_separator_runs(&mapped);
    let trimmed = collapsed.trim_matches(|c| c == '_' || c == '-');

    let mut name: String = trimmed.chars().take(MAX_TOOL_NAME_LEN).collect();
    while name.ends_with('_') || name.ends_with('-') {
        name.pop();
    }
    name
}

/// Collapse runs of `_`/`-` into the run's first character.
fn collapse_separator_runs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for ch in s.chars() {
        let is_sep = ch == '_' || ch == '-';
        if is_sep && in_run {
            continue;
        }
        in_run = is_sep;
        out.push(ch);
    }
    out
}

fn describe_operation(op: &Operation) -> String {
    if let Some(summary) = op.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return summary.to_string();
    }
    if let Some(desc) = op
        .description
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return desc.to_string();
    }

    let verb = match op.method {
        HttpMethod::Get => "Retrieve".to_string(),
        HttpMethod::Post => "Create".to_string(),
        HttpMethod::Put => "Update".to_string(),
        HttpMethod::Patch => "Partially update".to_string(),
        HttpMethod::Delete => "Delete".to_string(),
        HttpMethod::Head => "Get headers for".to_string(),
        HttpMethod::Options => "Get options for".to_string(),
    };
    format!("{verb} {}", humanize_path(&op.path))
}

/// `/plugins/{id}` → `/plugins/by id` for fallback descriptions.
fn humanize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 8);
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close) => {
                out.push_str("by ");
                out.push_str(&rest[open + 1..open + close]);
                rest = &rest[open + close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collect the scope strings named by the operation's `security` array,
/// falling back to the document-level default when the operation has none.
fn security_scopes(doc: &ApiDocument, op: &Operation) -> Vec<String> {
    let security = op.security.as_ref().or_else(|| doc.default_security());
    let Some(entries) = security.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut scopes: Vec<String> = Vec::new();
    for entry in entries {
        let Some(schemes) = entry.as_object() else {
            continue;
        };
        for required in schemes.values() {
            for scope in required.as_array().into_iter().flatten() {
                if let Some(s) = scope.as_str()
                    && !scopes.iter().any(|existing| existing == s)
                {
                    scopes.push(s.to_string());
                }
            }
        }
    }
    scopes
}
