//! Readable resources: named data a provider exposes next to its tools.
//!
//! A tool does something when called; a resource is read. Resources are
//! addressed by URI and grouped into sources, each of which decides which
//! URIs it answers for. Sources are asked in the order they were added.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Descriptor advertised by `list_resources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub mime_type: String,
}

/// What `read_resource` hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

pub trait ResourceSource: Send + Sync {
    /// Resources this source serves right now. Called on every listing, so
    /// sources backed by the file system see files created in between.
    fn list(&self) -> anyhow::Result<Vec<ResourceDef>>;

    /// Read `uri`. `Ok(None)` when this source has nothing under that URI.
    fn read(&self, uri: &str) -> anyhow::Result<Option<ResourceContents>>;
}

/// Resource sources in the order they were added.
#[derive(Default)]
pub struct ResourceRegistry {
    sources: Vec<Box<dyn ResourceSource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: impl ResourceSource + 'static) {
        self.sources.push(Box::new(source));
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Every source's resources, source by source.
    pub fn list(&self) -> Result<Vec<ResourceDef>, RemoteError> {
        let mut all = Vec::new();
        for source in &self.sources {
            let defs = source.list().map_err(|e| {
                warn!("listing resources failed: {e:#}");
                RemoteError::listing_failed(format!("{e:#}"))
            })?;
            all.extend(defs);
        }
        Ok(all)
    }

    /// Read `uri` from the first source that has it. A trailing `/` is
    /// ignored.
    pub fn read(&self, uri: &str) -> Result<ResourceContents, RemoteError> {
        let key = normalize(uri);
        for source in &self.sources {
            match source.read(key) {
                Ok(Some(contents)) => {
                    debug!("read resource {key} ({} bytes)", contents.text.len());
                    return Ok(contents);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("reading resource {key} failed: {e:#}");
                    return Err(RemoteError::resource_read(uri, format!("{e:#}")));
                }
            }
        }
        Err(RemoteError::unknown_resource(uri))
    }
}

fn normalize(uri: &str) -> &str {
    let trimmed = uri.trim_end_matches('/');
    // "file://" alone must not collapse to "file:"
    if trimmed.ends_with(':') { uri } else { trimmed }
}
