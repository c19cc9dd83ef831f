//! OpenAPI schema → JSON-Schema fragment conversion.
//!
//! Conversion is deliberately permissive: anything it does not understand
//! degrades to an empty (accept-anything) schema fragment instead of failing
//! synthesis for the whole route.

use serde_json::{Map, Value};

/// Where a parameter binds on the upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

impl ParamLocation {
    pub const fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
        }
    }

    pub fn parse(s: &str) -> Option<ParamLocation> {
        match s {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            _ => None,
        }
    }
}

/// A declared parameter with its converted schema fragment.
///
/// The schema carries an `x-parameter-in` marker so the execution dispatcher
/// can bind arguments without re-reading the original document.
#[derive(Debug, Clone)]
pub struct ConvertedParameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: Value,
}

#[derive(Debug, Clone)]
pub struct ConvertedBody {
    pub schema: Value,
    pub required: bool,
}

/// Marker key recording the parameter location inside its schema fragment.
pub const PARAMETER_IN_KEY: &str = "x-parameter-in";
/// Marker key recording a non-default request body content type.
pub const CONTENT_TYPE_KEY: &str = "x-content-type";

const DEFAULT_BODY_CONTENT_TYPE: &str = "application/json";
const PREFERRED_BODY_CONTENT_TYPES: [&str; 3] =
    ["application/json", "application/vnd.api+json", "text/json"];

// Constraint keys copied verbatim from OpenAPI schemas into JSON-Schema
// fragments. `enum` passes through unmodified.
const COPIED_KEYS: [&str; 17] = [
    "type",
    "format",
    "description",
    "default",
    "example",
    "enum",
    "minLength",
    "maxLength",
    "pattern",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minItems",
    "maxItems",
    "uniqueItems",
];

const MAX_REF_DEPTH: usize = 16;

/// Convert an OpenAPI schema into a JSON-Schema fragment.
///
/// Local `$ref`s (`#/...`) are resolved against `root` up to a fixed depth;
/// unresolvable or cyclic references degrade to an empty schema.
pub fn convert_schema(root: &Value, schema: &Value) -> Value {
    convert_at(root, schema, 0)
}

fn convert_at(root: &Value, schema: &Value, depth: usize) -> Value {
    let Some(obj) = schema.as_object() else {
        return Value::Object(Map::new());
    };

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        if depth >= MAX_REF_DEPTH {
            return Value::Object(Map::new());
        }
        return match resolve_local_ref(root, reference) {
            Some(target) => convert_at(root, target, depth + 1),
            None => Value::Object(Map::new()),
        };
    }

    let mut out = Map::new();
    for key in COPIED_KEYS {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }

    if let Some(items) = obj.get("items") {
        out.insert("items".to_string(), convert_at(root, items, depth + 1));
    }

    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        let converted: Map<String, Value> = props
            .iter()
            .map(|(k, v)| (k.clone(), convert_at(root, v, depth + 1)))
            .collect();
        out.insert("properties".to_string(), Value::Object(converted));
    }

    // Only the array form: Swagger 2.0 parameter objects carry a boolean
    // `required` that belongs to the parameter, not the schema.
    if let Some(required) = obj.get("required").filter(|v| v.is_array()) {
        out.insert("required".to_string(), required.clone());
    }

    match obj.get("additionalProperties") {
        Some(Value::Bool(b)) => {
            out.insert("additionalProperties".to_string(), Value::Bool(*b));
        }
        Some(v @ Value::Object(_)) => {
            out.insert(
                "additionalProperties".to_string(),
                convert_at(root, v, depth + 1),
            );
        }
        _ => {}
    }

    Value::Object(out)
}

fn resolve_local_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    root.pointer(reference.strip_prefix('#')?)
}

/// Convert a raw parameter object into its name, binding location and schema.
///
/// Handles both OpenAPI 3.x parameters (nested `schema`) and Swagger 2.0
/// inline-typed parameters (constraints directly on the parameter object).
/// Parameters in unsupported locations (e.g. `cookie`) are dropped.
pub fn convert_parameter(root: &Value, param: &Value) -> Option<ConvertedParameter> {
    let obj = param.as_object()?;
    let name = obj.get("name").and_then(Value::as_str)?.to_string();
    let location = ParamLocation::parse(obj.get("in").and_then(Value::as_str)?)?;

    let source = obj.get("schema").unwrap_or(param);
    let mut schema = convert_schema(root, source);

    if let Some(fragment) = schema.as_object_mut() {
        if !fragment.contains_key("description")
            && let Some(desc) = obj.get("description").filter(|v| v.is_string())
        {
            fragment.insert("description".to_string(), desc.clone());
        }
        fragment.insert(
            PARAMETER_IN_KEY.to_string(),
            Value::String(location.as_str().to_string()),
        );
    }

    // Path parameters are always required regardless of what the document says.
    let required = location == ParamLocation::Path
        || obj.get("required").and_then(Value::as_bool).unwrap_or(false);

    Some(ConvertedParameter {
        name,
        location,
        required,
        schema,
    })
}

/// Convert a request body source into a schema fragment.
///
/// Accepts either an OpenAPI 3.x `requestBody` object (selects a JSON-ish
/// content type, falling back to the first one carrying a schema) or a
/// Swagger 2.0 `in: body` parameter. Returns `None` when no schema exists.
pub fn convert_request_body(root: &Value, source: &Value) -> Option<ConvertedBody> {
    let obj = match source.as_object() {
        Some(o) if o.contains_key("$ref") => resolve_local_ref(
            root,
            o.get("$ref").and_then(Value::as_str).unwrap_or_default(),
        )?
        .as_object()?,
        Some(o) => o,
        None => return None,
    };

    // Swagger 2.0 body parameter.
    if obj.get("in").and_then(Value::as_str) == Some("body") {
        let raw = obj.get("schema")?;
        let mut schema = convert_schema(root, raw);
        attach_description(&mut schema, obj.get("description"));
        return Some(ConvertedBody {
            schema,
            required: obj.get("required").and_then(Value::as_bool).unwrap_or(false),
        });
    }

    let content = obj.get("content").and_then(Value::as_object)?;
    let (content_type, media) = select_body_media(content)?;

    let mut schema = convert_schema(root, media.get("schema")?);
    attach_description(&mut schema, obj.get("description"));
    if content_type != DEFAULT_BODY_CONTENT_TYPE
        && let Some(fragment) = schema.as_object_mut()
    {
        fragment.insert(
            CONTENT_TYPE_KEY.to_string(),
            Value::String(content_type.to_string()),
        );
    }

    Some(ConvertedBody {
        schema,
        required: obj.get("required").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn select_body_media<'a>(
    content: &'a Map<String, Value>,
) -> Option<(&'a str, &'a Map<String, Value>)> {
    for ct in PREFERRED_BODY_CONTENT_TYPES {
        if let Some(media) = content.get(ct).and_then(Value::as_object)
            && media.contains_key("schema")
        {
            return Some((ct, media));
        }
    }
    content
        .iter()
        .filter_map(|(ct, media)| media.as_object().map(|m| (ct.as_str(), m)))
        .find(|(_, media)| media.contains_key("schema"))
}

fn attach_description(schema: &mut Value, description: Option<&Value>) {
    if let Some(fragment) = schema.as_object_mut()
        && !fragment.contains_key("description")
        && let Some(desc) = description.filter(|v| v.is_string())
    {
        fragment.insert("description".to_string(), desc.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copies_string_and_numeric_constraints() {
        let schema = json!({
            "type": "string",
            "minLength": 2,
            "maxLength": 8,
            "pattern": "^[a-z]+$",
            "description": "a name",
            "x-vendor-junk": true
        });
        let converted = convert_schema(&Value::Null, &schema);
        assert_eq!(converted["type"], json!("string"));
        assert_eq!(converted["minLength"], json!(2));
        assert_eq!(converted["pattern"], json!("^[a-z]+$"));
        assert!(converted.get("x-vendor-junk").is_none());
    }

    #[test]
    fn enums_pass_through_verbatim() {
        let schema = json!({ "type": "string", "enum": ["on", "off"] });
        let converted = convert_schema(&Value::Null, &schema);
        assert_eq!(converted["enum"], json!(["on", "off"]));
    }

    #[test]
    fn recurses_into_items_and_properties() {
        let schema = json!({
            "type": "object",
            "required": ["tags"],
            "properties": {
                "tags": {
                    "type": "array",
                    "minItems": 1,
                    "items": { "type": "string", "maxLength": 16 }
                }
            },
            "additionalProperties": false
        });
        let converted = convert_schema(&Value::Null, &schema);
        assert_eq!(converted["required"], json!(["tags"]));
        assert_eq!(
            converted.pointer("/properties/tags/items/maxLength"),
            Some(&json!(16))
        );
        assert_eq!(converted["additionalProperties"], json!(false));
    }

    #[test]
    fn resolves_local_refs_and_degrades_on_cycles() {
        let root = json!({
            "components": {
                "schemas": {
                    "Pet": { "type": "object", "properties": { "name": { "type": "string" } } },
                    "Loop": { "$ref": "#/components/schemas/Loop" }
                }
            }
        });

        let converted = convert_schema(&root, &json!({ "$ref": "#/components/schemas/Pet" }));
        assert_eq!(
            converted.pointer("/properties/name/type"),
            Some(&json!("string"))
        );

        let cyclic = convert_schema(&root, &json!({ "$ref": "#/components/schemas/Loop" }));
        assert_eq!(cyclic, json!({}));

        let dangling = convert_schema(&root, &json!({ "$ref": "#/components/schemas/Nope" }));
        assert_eq!(dangling, json!({}));
    }

    #[test]
    fn non_object_schema_degrades_to_permissive() {
        assert_eq!(convert_schema(&Value::Null, &json!("string")), json!({}));
        assert_eq!(convert_schema(&Value::Null, &Value::Null), json!({}));
    }

    #[test]
    fn converts_openapi3_parameter() {
        let param = json!({
            "name": "verbose",
            "in": "query",
            "description": "include details",
            "schema": { "type": "boolean", "default": false }
        });
        let p = convert_parameter(&Value::Null, &param).expect("converted");
        assert_eq!(p.name, "verbose");
        assert_eq!(p.location, ParamLocation::Query);
        assert!(!p.required);
        assert_eq!(p.schema["type"], json!("boolean"));
        assert_eq!(p.schema["description"], json!("include details"));
        assert_eq!(p.schema[PARAMETER_IN_KEY], json!("query"));
    }

    #[test]
    fn converts_swagger2_inline_parameter() {
        let param = json!({
            "name": "limit",
            "in": "query",
            "required": true,
            "type": "integer",
            "format": "int32",
            "minimum": 1
        });
        let p = convert_parameter(&Value::Null, &param).expect("converted");
        assert!(p.required);
        assert_eq!(p.schema["type"], json!("integer"));
        assert_eq!(p.schema["minimum"], json!(1));
        // The parameter's boolean `required` never leaks into the schema.
        assert!(p.schema.get("required").is_none());
    }

    #[test]
    fn path_parameters_are_always_required() {
        let param = json!({ "name": "id", "in": "path", "schema": { "type": "string" } });
        let p = convert_parameter(&Value::Null, &param).expect("converted");
        assert!(p.required);
        assert_eq!(p.location, ParamLocation::Path);
    }

    #[test]
    fn drops_unsupported_parameter_locations() {
        let param = json!({ "name": "session", "in": "cookie", "schema": {} });
        assert!(convert_parameter(&Value::Null, &param).is_none());
    }

    #[test]
    fn body_prefers_application_json() {
        let body = json!({
            "required": true,
            "content": {
                "application/xml": { "schema": { "type": "string" } },
                "application/json": { "schema": { "type": "object" } }
            }
        });
        let b = convert_request_body(&Value::Null, &body).expect("body");
        assert!(b.required);
        assert_eq!(b.schema["type"], json!("object"));
        assert!(b.schema.get(CONTENT_TYPE_KEY).is_none());
    }

    #[test]
    fn body_marks_non_default_content_type() {
        let body = json!({
            "content": {
                "application/vnd.api+json": { "schema": { "type": "object" } }
            }
        });
        let b = convert_request_body(&Value::Null, &body).expect("body");
        assert_eq!(b.schema[CONTENT_TYPE_KEY], json!("application/vnd.api+json"));
    }

    #[test]
    fn body_falls_back_to_first_content_type_with_schema() {
        let body = json!({
            "content": {
                "application/octet-stream": {},
                "application/xml": { "schema": { "type": "string" } }
            }
        });
        let b = convert_request_body(&Value::Null, &body).expect("body");
        assert_eq!(b.schema[CONTENT_TYPE_KEY], json!("application/xml"));
    }

    #[test]
    fn body_without_schema_is_absent() {
        let body = json!({ "content": { "application/json": {} } });
        assert!(convert_request_body(&Value::Null, &body).is_none());
    }

    #[test]
    fn swagger2_body_parameter_converts() {
        let body = json!({
            "name": "pet",
            "in": "body",
            "required": true,
            "description": "the pet to create",
            "schema": { "type": "object", "properties": { "name": { "type": "string" } } }
        });
        let b = convert_request_body(&Value::Null, &body).expect("body");
        assert!(b.required);
        assert_eq!(b.schema["description"], json!("the pet to create"));
        assert_eq!(
            b.schema.pointer("/properties/name/type"),
            Some(&json!("string"))
        );
    }
}
