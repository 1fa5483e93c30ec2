use serde_json::Value;

use crate::types::{ToolArgs, ToolDef};

/// A tool that can be registered with the registry and invoked by callers.
///
/// # Example
/// ```rust
/// use serde_json::{Value, json};
/// use toolwire_mcp::{ParamType, Tool, ToolArgs, ToolDef, ToolParam};
///
/// struct EchoTool;
///
/// impl Tool for EchoTool {
///     fn def(&self) -> ToolDef {
///         ToolDef {
///             name: "echo".into(),
///             description: "Return the input unchanged.".into(),
///             params: vec![ToolParam::required("text", ParamType::String, "Text to echo")],
///         }
///     }
///
///     fn call(&self, args: &ToolArgs) -> anyhow::Result<Value> {
///         Ok(json!(args.require_str("text")?))
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// Static metadata: name, description, parameter schema.
    /// Read once, when the tool is registered.
    fn def(&self) -> ToolDef;

    /// Invoke the tool with arguments that already passed validation against
    /// [`Tool::def`]. An `Err` is reported to the caller as a tool execution
    /// error; it never ends the session.
    fn call(&self, args: &ToolArgs) -> anyhow::Result<Value>;
}
