use std::collections::HashMap;

use log::debug;

use crate::{error::RegistryError, tool::Tool, types::ToolDef};

struct Entry {
    def: ToolDef,
    tool: Box<dyn Tool>,
}

/// Holds all registered tools in registration order.
///
/// Built once at startup; the provider engine takes it by value, so nothing
/// can be added or removed while a session is being served.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Its descriptor is captured here and never re-read.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let def = tool.def();
        if self.index.contains_key(&def.name) {
            return Err(RegistryError::DuplicateToolName(def.name));
        }
        debug!("registered tool {} ({} params)", def.name, def.params.len());
        self.index.insert(def.name.clone(), self.entries.len());
        self.entries.push(Entry {
            def,
            tool: Box::new(tool),
        });
        Ok(())
    }

    /// Retrieve a tool by exact name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.entry(name).map(|e| e.tool.as_ref())
    }

    /// Descriptor and implementation registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<(&ToolDef, &dyn Tool)> {
        self.entry(name).map(|e| (&e.def, e.tool.as_ref()))
    }

    /// The descriptor captured when `name` was registered.
    pub fn def(&self, name: &str) -> Option<&ToolDef> {
        self.entry(name).map(|e| &e.def)
    }

    /// All tool definitions, in registration order.
    pub fn defs(&self) -> Vec<ToolDef> {
        self.entries.iter().map(|e| e.def.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.def.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }
}
