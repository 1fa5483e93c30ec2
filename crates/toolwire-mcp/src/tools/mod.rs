mod get_time;
mod notes;
mod say_hello;

use std::path::PathBuf;

pub use get_time::GetTimeTool;
pub use notes::{CreateSampleDataTool, WriteNoteTool};
pub use say_hello::SayHelloTool;

use crate::{error::RegistryError, registry::ToolRegistry};

/// Name the provider reports for itself in generated data and status.
pub(crate) const SERVER_NAME: &str = "toolwire";

/// Registry with every builtin tool. File-writing tools put their output
/// under `notes_dir`.
pub fn builtin_registry(notes_dir: impl Into<PathBuf>) -> Result<ToolRegistry, RegistryError> {
    let notes_dir = notes_dir.into();
    let mut registry = ToolRegistry::new();
    registry.register(SayHelloTool)?;
    registry.register(GetTimeTool)?;
    registry.register(WriteNoteTool::new(notes_dir.clone()))?;
    registry.register(CreateSampleDataTool::new(notes_dir))?;
    Ok(registry)
}
