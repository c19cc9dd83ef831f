//! Inline OpenAPI / Swagger document loading and operation enumeration.

use serde_json::{Map, Value};
use thiserror::Error;

/// Why an inline API specification was rejected at load time.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("API specification is empty")]
    Empty,
    #[error("API specification is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("API specification must be a JSON object")]
    NotAnObject,
    #[error("API specification has no `openapi` or `swagger` version marker")]
    MissingVersionMarker,
    #[error("API specification has no `paths` object")]
    MissingPaths,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    OpenApi3,
    Swagger2,
}

/// The closed set of HTTP method keys enumerated under a path item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    /// Lower-case path-item key (`get`, `post`, ...).
    pub const fn key(self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
        }
    }

    /// Upper-case wire form (`GET`, `POST`, ...).
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// One enumerated HTTP operation.
///
/// `parameters` holds the raw parameter objects (path-item level merged with
/// operation level). `request_body` holds the raw body source: an OpenAPI 3.x
/// `requestBody` object, or a Swagger 2.0 `in: body` parameter; the schema
/// converter handles both shapes.
#[derive(Debug, Clone)]
pub struct Operation {
    pub path: String,
    pub method: HttpMethod,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub parameters: Vec<Value>,
    pub request_body: Option<Value>,
    pub responses: Value,
    pub tags: Vec<String>,
    pub security: Option<Value>,
}

/// A parsed inline API document.
#[derive(Debug, Clone)]
pub struct ApiDocument {
    root: Value,
    version: SpecVersion,
}

impl ApiDocument {
    /// Parse a JSON-encoded OpenAPI 3.x or Swagger 2.0 document.
    pub fn parse(input: &str) -> Result<ApiDocument, SpecError> {
        if input.trim().is_empty() {
            return Err(SpecError::Empty);
        }
        let root: Value = serde_json::from_str(input)?;
        let obj = root.as_object().ok_or(SpecError::NotAnObject)?;

        let version = if obj.get("openapi").is_some_and(Value::is_string) {
            SpecVersion::OpenApi3
        } else if obj.get("swagger").is_some_and(Value::is_string) {
            SpecVersion::Swagger2
        } else {
            return Err(SpecError::MissingVersionMarker);
        };

        if !obj.get("paths").is_some_and(Value::is_object) {
            return Err(SpecError::MissingPaths);
        }

        Ok(ApiDocument { root, version })
    }

    pub const fn version(&self) -> SpecVersion {
        self.version
    }

    /// The raw document root, for `$ref` resolution.
    pub const fn root(&self) -> &Value {
        &self.root
    }

    /// Document-level default `security` requirements, if any.
    pub fn default_security(&self) -> Option<&Value> {
        self.root.get("security")
    }

    /// Enumerate all operations: every path crossed with the closed set of
    /// HTTP method keys. Order follows the document's path map and the fixed
    /// method order, so it is stable across runs.
    pub fn operations(&self) -> Vec<Operation> {
        let Some(paths) = self.root.get("paths").and_then(Value::as_object) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            let item_params: Vec<Value> = item
                .get("parameters")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for method in HttpMethod::ALL {
                let Some(op) = item.get(method.key()).and_then(Value::as_object) else {
                    continue;
                };
                out.push(self.build_operation(path, method, op, &item_params));
            }
        }
        out
    }

    fn build_operation(
        &self,
        path: &str,
        method: HttpMethod,
        op: &Map<String, Value>,
        item_params: &[Value],
    ) -> Operation {
        let op_params: Vec<Value> = op
            .get("parameters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let merged = merge_parameters(item_params, &op_params);

        // Swagger 2.0 models the request body as an `in: body` parameter;
        // split it out so downstream code sees one body source either way.
        let mut parameters = Vec::new();
        let mut body_param = None;
        for p in merged {
            if param_location(&p) == Some("body") {
                body_param.get_or_insert(p);
            } else {
                parameters.push(p);
            }
        }

        let request_body = op.get("requestBody").cloned().or(body_param);

        Operation {
            path: path.to_string(),
            method,
            operation_id: str_field(op, "operationId"),
            summary: str_field(op, "summary"),
            description: str_field(op, "description"),
            parameters,
            request_body,
            responses: op.get("responses").cloned().unwrap_or(Value::Null),
            tags: op
                .get("tags")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            security: op.get("security").cloned(),
        }
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn param_location(param: &Value) -> Option<&str> {
    param.get("in").and_then(Value::as_str)
}

fn param_key(param: &Value) -> Option<(String, String)> {
    let name = param.get("name").and_then(Value::as_str)?;
    let location = param_location(param)?;
    Some((name.to_string(), location.to_string()))
}

/// Operation-level parameters override path-item-level ones by `(name, in)`.
fn merge_parameters(item_params: &[Value], op_params: &[Value]) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::new();
    for p in item_params {
        let overridden = param_key(p)
            .is_some_and(|k| op_params.iter().any(|o| param_key(o).as_ref() == Some(&k)));
        if !overridden {
            merged.push(p.clone());
        }
    }
    merged.extend(op_params.iter().cloned());
    merged
}
