use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, bail};
use chrono::Local;
use serde_json::{Value, json};

use super::SERVER_NAME;
use crate::{
    tool::Tool,
    types::{ParamType, ToolArgs, ToolDef, ToolParam},
};

/// Resolve `filename` inside `dir`, refusing anything but a plain file name.
fn resolve(dir: &Path, filename: &str) -> anyhow::Result<PathBuf> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(filename)),
        _ => bail!("invalid file name {filename:?}: expected a plain file name"),
    }
}

/// Writes a timestamped note to a text file.
pub struct WriteNoteTool {
    dir: PathBuf,
}

impl WriteNoteTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Tool for WriteNoteTool {
    fn def(&self) -> ToolDef {
        ToolDef {
            name: "write_note".into(),
            description: "Write a note to a text file".into(),
            params: vec![
                ToolParam::required("filename", ParamType::String, "File to write"),
                ToolParam::required("content", ParamType::String, "Note body"),
            ],
        }
    }

    fn call(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        let path = resolve(&self.dir, args.require_str("filename")?)?;
        let content = args.require_str("content")?;
        let note = format!("Note created: {}\n\n{content}", Local::now().to_rfc3339());
        fs::write(&path, note).with_context(|| format!("writing {}", path.display()))?;
        Ok(json!(format!("Note saved to: {}", path.display())))
    }
}

/// Writes a small JSON document with sample users and settings.
pub struct CreateSampleDataTool {
    dir: PathBuf,
}

impl CreateSampleDataTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Tool for CreateSampleDataTool {
    fn def(&self) -> ToolDef {
        ToolDef {
            name: "create_sample_data".into(),
            description: "Create a sample JSON data file".into(),
            params: vec![ToolParam::required(
                "filename",
                ParamType::String,
                "Name for the JSON file",
            )],
        }
    }

    fn call(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        let mut filename = args.require_str("filename")?.to_string();
        if !filename.ends_with(".json") {
            filename.push_str(".json");
        }
        let path = resolve(&self.dir, &filename)?;

        let sample = json!({
            "created_at": Local::now().to_rfc3339(),
            "server": SERVER_NAME,
            "data": {
                "users": [
                    {"id": 1, "name": "Alice", "role": "admin"},
                    {"id": 2, "name": "Bob", "role": "user"},
                    {"id": 3, "name": "Charlie", "role": "user"},
                ],
                "settings": {
                    "theme": "dark",
                    "notifications": true,
                    "language": "en",
                },
            },
        });
        let body = serde_json::to_string_pretty(&sample)?;
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        Ok(json!(format!("Created sample data file: {}", path.display())))
    }
}
