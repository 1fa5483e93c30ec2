use chrono::{Local, SecondsFormat};
use serde_json::{Value, json};

use crate::{
    tool::Tool,
    types::{ToolArgs, ToolDef},
};

/// Reports the provider's local time as an RFC 3339 timestamp.
pub struct GetTimeTool;

impl Tool for GetTimeTool {
    fn def(&self) -> ToolDef {
        ToolDef {
            name: "get_time".into(),
            description: "Returns the current local time as an RFC 3339 timestamp".into(),
            params: vec![],
        }
    }

    fn call(&self, _args: &ToolArgs) -> anyhow::Result<Value> {
        Ok(json!(Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)))
    }
}
