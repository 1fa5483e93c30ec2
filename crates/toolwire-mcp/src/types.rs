use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Parameter schema ──────────────────────────────────────────────────────────

/// Type tags a tool parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Whether `value` satisfies this type tag.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the JSON type of `value`, used when reporting type mismatches.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single parameter in a tool's input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(default)]
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ty,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ty,
            required: false,
        }
    }
}

// ── Tool definition ───────────────────────────────────────────────────────────

/// Static metadata that describes a tool to callers.
/// This is what discovery returns, one entry per registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "input_schema", default)]
    pub params: Vec<ToolParam>,
}

impl ToolDef {
    /// Look up a declared parameter by exact name.
    pub(crate) fn param(&self, name: &str) -> Option<&ToolParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ── Tool arguments (caller → tool) ────────────────────────────────────────────

/// Argument map of an invocation, keyed by argument name.
pub type Arguments = Map<String, Value>;

/// Arguments handed to a tool implementation once they passed schema
/// validation.
#[derive(Debug, Clone, Default)]
pub struct ToolArgs {
    values: Arguments,
}

impl ToolArgs {
    pub fn new(values: Arguments) -> Self {
        Self { values }
    }

    /// Convenience: get a string argument by key.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key)?.as_str()
    }

    /// Convenience: get an i64 argument by key.
    pub fn int(&self, key: &str) -> Option<i64> {
        self.values.get(key)?.as_i64()
    }

    /// Like [`ToolArgs::str`] but fails with a readable error, for arguments
    /// the schema marks as required.
    pub fn require_str(&self, key: &str) -> anyhow::Result<&str> {
        self.str(key)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: {key}"))
    }
}
