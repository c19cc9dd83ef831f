//! OpenAPI → MCP tool machinery.
//!
//! This crate is pure data plumbing: it parses an inline OpenAPI 3.x or
//! Swagger 2.0 document, enumerates its HTTP operations, converts parameter
//! and body schemas into JSON-Schema fragments, and synthesises MCP tool
//! definitions (name, description, input schema, execution metadata).
//!
//! It performs no I/O; callers hand it the raw document string and get back
//! plain `serde_json` values plus typed operation/tool records.

pub mod convert;
pub mod spec;
pub mod synth;

pub use spec::{ApiDocument, HttpMethod, Operation, SpecError, SpecVersion};
pub use synth::{ToolDefinition, synthesize_tools, tool_name};
