use std::path::PathBuf;

use chrono::{Local, SecondsFormat};
use serde_json::json;

use super::files::data_files;
use crate::{
    resource::{ResourceContents, ResourceDef, ResourceSource},
    tools::SERVER_NAME,
};

pub const STATUS_URI: &str = "server://status";

/// The directory listing and this status page, on top of the data files.
const FIXED_RESOURCES: usize = 2;

/// Provider status as a JSON document under [`STATUS_URI`].
pub struct ServerStatus {
    dir: PathBuf,
    tools_count: usize,
}

impl ServerStatus {
    pub fn new(dir: impl Into<PathBuf>, tools_count: usize) -> Self {
        Self {
            dir: dir.into(),
            tools_count,
        }
    }
}

impl ResourceSource for ServerStatus {
    fn list(&self) -> anyhow::Result<Vec<ResourceDef>> {
        Ok(vec![ResourceDef {
            uri: STATUS_URI.into(),
            name: "Server Status".into(),
            description: "Current provider status and information".into(),
            mime_type: "application/json".into(),
        }])
    }

    fn read(&self, uri: &str) -> anyhow::Result<Option<ResourceContents>> {
        if uri != STATUS_URI {
            return Ok(None);
        }
        let resources_available = FIXED_RESOURCES + data_files(&self.dir)?.len();
        let status = json!({
            "server_name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
            "capabilities": ["tools", "resources"],
            "tools_count": self.tools_count,
            "resources_available": resources_available,
            "current_time": Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        });
        Ok(Some(ResourceContents {
            uri: uri.into(),
            mime_type: "application/json".into(),
            text: serde_json::to_string_pretty(&status)?,
        }))
    }
}
