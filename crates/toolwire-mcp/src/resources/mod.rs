mod files;
mod status;

use std::path::PathBuf;

pub use files::{DIRECTORY_URI, DataFiles, DirectoryListing};
pub use status::{STATUS_URI, ServerStatus};

use crate::resource::ResourceRegistry;

/// The builtin resources, all rooted at `data_dir`: a directory listing,
/// the status page, then one resource per JSON or text file.
pub fn builtin_resources(data_dir: impl Into<PathBuf>, tools_count: usize) -> ResourceRegistry {
    let data_dir = data_dir.into();
    let mut registry = ResourceRegistry::new();
    registry.add(DirectoryListing::new(data_dir.clone()));
    registry.add(ServerStatus::new(data_dir.clone(), tools_count));
    registry.add(DataFiles::new(data_dir));
    registry
}
