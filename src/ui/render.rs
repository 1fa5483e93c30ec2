use serde_json::Value;
use toolwire_mcp::{CallError, RemoteError, ResourceContents, ResourceDef, ToolDef};

use super::theme::{Theme, paint, paint_err};

pub fn heading(text: &str) {
    println!("{}", paint(Theme::title(), text));
}

/// One block per tool: name and description, then its parameters.
pub fn print_tools(tools: &[ToolDef]) {
    for tool in tools {
        println!(
            "  {} {}",
            paint(Theme::tool_name(), &tool.name),
            paint(Theme::dimmed(), &tool.description)
        );
        for param in &tool.params {
            let flag = if param.required { "required" } else { "optional" };
            let mut line = format!(
                "      {}: {} ({flag})",
                param.name,
                paint(Theme::param_type(), param.ty.as_str())
            );
            if !param.description.is_empty() {
                line.push_str(&format!(" - {}", param.description));
            }
            println!("{line}");
        }
    }
}

/// Strings print as-is; anything else as pretty JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

pub fn print_result(value: &Value) {
    println!("{}", paint(Theme::value(), &format_value(value)));
}

pub fn print_resources(resources: &[ResourceDef]) {
    for resource in resources {
        println!(
            "  {} {}",
            paint(Theme::tool_name(), &resource.uri),
            paint(Theme::dimmed(), &format!("({})", resource.mime_type))
        );
        println!("      {}", resource.name);
        if !resource.description.is_empty() {
            println!("      {}", paint(Theme::dimmed(), &resource.description));
        }
    }
}

pub fn print_contents(contents: &ResourceContents) {
    println!("{}", contents.text);
}

pub fn print_remote_error(err: &RemoteError) {
    eprintln!(
        "{} {}",
        paint_err(Theme::error(), &format!("[{}]", err.kind)),
        err.detail
    );
    for v in &err.violations {
        eprintln!("  {} {v}", paint_err(Theme::label(), "-"));
    }
}

pub fn print_call_error(err: &CallError) {
    match err {
        CallError::Remote(remote) => print_remote_error(remote),
        CallError::ProtocolError {
            remote: Some(remote),
            ..
        } => {
            eprintln!("{} {err}", paint_err(Theme::error(), "error:"));
            print_remote_error(remote);
        }
        other => eprintln!("{} {other}", paint_err(Theme::error(), "error:")),
    }
}
