//! Small tools with predictable behaviour for engine tests.

use std::{thread, time::Duration};

use anyhow::bail;
use serde_json::{Value, json};

use crate::{
    registry::ToolRegistry,
    tool::Tool,
    tools::SayHelloTool,
    types::{ParamType, ToolArgs, ToolDef, ToolParam},
};

pub struct FailingTool;

impl Tool for FailingTool {
    fn def(&self) -> ToolDef {
        ToolDef {
            name: "fail".into(),
            description: "Always fails.".into(),
            params: vec![],
        }
    }

    fn call(&self, _args: &ToolArgs) -> anyhow::Result<Value> {
        bail!("disk on fire")
    }
}

pub struct PanickingTool;

impl Tool for PanickingTool {
    fn def(&self) -> ToolDef {
        ToolDef {
            name: "panic".into(),
            description: "Panics.".into(),
            params: vec![],
        }
    }

    fn call(&self, _args: &ToolArgs) -> anyhow::Result<Value> {
        panic!("tool bug")
    }
}

/// Sleeps for `ms` milliseconds, then returns `ms`.
pub struct SleepTool;

impl Tool for SleepTool {
    fn def(&self) -> ToolDef {
        ToolDef {
            name: "sleep".into(),
            description: "Sleeps.".into(),
            params: vec![ToolParam::required("ms", ParamType::Integer, "")],
        }
    }

    fn call(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        let ms = args.int("ms").unwrap_or(0).max(0) as u64;
        thread::sleep(Duration::from_millis(ms));
        Ok(json!(ms))
    }
}

pub fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(SayHelloTool).unwrap();
    registry.register(FailingTool).unwrap();
    registry.register(PanickingTool).unwrap();
    registry.register(SleepTool).unwrap();
    registry
}

pub fn args(value: Value) -> crate::types::Arguments {
    match value {
        Value::Object(map) => map,
        other => panic!("arguments must be an object, got {other}"),
    }
}
