use serde_json::{Value, json};

use crate::{
    tool::Tool,
    types::{ParamType, ToolArgs, ToolDef, ToolParam},
};

/// Greets someone by name.
pub struct SayHelloTool;

impl Tool for SayHelloTool {
    fn def(&self) -> ToolDef {
        ToolDef {
            name: "say_hello".into(),
            description: "Says hello to someone".into(),
            params: vec![ToolParam::required(
                "name",
                ParamType::String,
                "Who to greet",
            )],
        }
    }

    fn call(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        let name = args.require_str("name")?;
        Ok(json!(format!("Hello, {name}!")))
    }
}
