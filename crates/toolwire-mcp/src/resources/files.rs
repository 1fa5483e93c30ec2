use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;

use crate::resource::{ResourceContents, ResourceDef, ResourceSource};

pub const DIRECTORY_URI: &str = "file://current-directory";

const FILE_SCHEME: &str = "file://";

/// Data files worth advertising, and the mime type each is served with.
const DATA_EXTENSIONS: [(&str, &str); 2] = [("json", "application/json"), ("txt", "text/plain")];

fn mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    DATA_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

/// `*.json` then `*.txt` files directly inside `dir`, each group sorted by
/// name. A missing directory holds no files.
pub(crate) fn data_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && mime_type(&path).is_some() {
            files.push(path);
        }
    }
    files.sort_by_key(|p| {
        let rank = DATA_EXTENSIONS
            .iter()
            .position(|(ext, _)| p.extension().and_then(|e| e.to_str()) == Some(*ext));
        (rank, p.file_name().map(|n| n.to_os_string()))
    });
    Ok(files)
}

/// A listing of the data directory under [`DIRECTORY_URI`].
pub struct DirectoryListing {
    dir: PathBuf,
}

impl DirectoryListing {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ResourceSource for DirectoryListing {
    fn list(&self) -> anyhow::Result<Vec<ResourceDef>> {
        Ok(vec![ResourceDef {
            uri: DIRECTORY_URI.into(),
            name: "Current Directory".into(),
            description: "List of files in the data directory".into(),
            mime_type: "text/plain".into(),
        }])
    }

    fn read(&self, uri: &str) -> anyhow::Result<Option<ResourceContents>> {
        if uri != DIRECTORY_URI {
            return Ok(None);
        }
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("listing {}", self.dir.display()))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        let mut text = String::from("Directory contents:");
        for name in &names {
            text.push_str("\n  ");
            text.push_str(name);
        }
        Ok(Some(ResourceContents {
            uri: uri.into(),
            mime_type: "text/plain".into(),
            text,
        }))
    }
}

/// JSON and text files in the data directory, one resource per file,
/// addressed as `file://<file name>`.
pub struct DataFiles {
    dir: PathBuf,
}

impl DataFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The file behind `uri`, if it names a data file this source could
    /// serve. Only plain file names are accepted.
    fn resolve(&self, uri: &str) -> Option<(PathBuf, &'static str)> {
        let name = uri.strip_prefix(FILE_SCHEME)?;
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return None;
        }
        let path = self.dir.join(name);
        let mime = mime_type(&path)?;
        Some((path, mime))
    }
}

impl ResourceSource for DataFiles {
    fn list(&self) -> anyhow::Result<Vec<ResourceDef>> {
        let files = data_files(&self.dir)?;
        Ok(files
            .iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                let mime = mime_type(path)?;
                let label = if mime == "application/json" { "JSON data" } else { "Text file" };
                Some(ResourceDef {
                    uri: format!("{FILE_SCHEME}{name}"),
                    name: format!("{label}: {name}"),
                    description: format!("Contents of {name}"),
                    mime_type: mime.into(),
                })
            })
            .collect())
    }

    fn read(&self, uri: &str) -> anyhow::Result<Option<ResourceContents>> {
        let Some((path, mime)) = self.resolve(uri) else {
            return Ok(None);
        };
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(ResourceContents {
                uri: uri.into(),
                mime_type: mime.into(),
                text,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users.json"), "{\"users\": []}").unwrap();
        fs::write(dir.path().join("b.txt"), "bee").unwrap();
        fs::write(dir.path().join("a.txt"), "ay").unwrap();
        fs::write(dir.path().join("script.sh"), "echo").unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();
        dir
    }

    #[test]
    fn lists_json_before_text() {
        let dir = populated();
        let uris: Vec<String> = DataFiles::new(dir.path())
            .list()
            .unwrap()
            .into_iter()
            .map(|d| d.uri)
            .collect();
        assert_eq!(uris, ["file://users.json", "file://a.txt", "file://b.txt"]);
    }

    #[test]
    fn reads_files_with_their_mime_type() {
        let dir = populated();
        let files = DataFiles::new(dir.path());

        let json = files.read("file://users.json").unwrap().unwrap();
        assert_eq!(json.mime_type, "application/json");
        assert_eq!(json.text, "{\"users\": []}");

        let text = files.read("file://a.txt").unwrap().unwrap();
        assert_eq!(text.mime_type, "text/plain");
        assert_eq!(text.text, "ay");
    }

    #[test]
    fn only_advertised_files_are_served() {
        let dir = populated();
        let files = DataFiles::new(dir.path());
        for uri in [
            "file://script.sh",
            "file://missing.json",
            "file://../users.json",
            "file:///etc/hosts.txt",
            "file://",
            "server://status",
        ] {
            assert!(files.read(uri).unwrap().is_none(), "{uri}");
        }
    }

    #[test]
    fn missing_directory_has_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::new(dir.path().join("nope"));
        assert!(files.list().unwrap().is_empty());
    }

    #[test]
    fn directory_listing_marks_subdirectories() {
        let dir = populated();
        let listing = DirectoryListing::new(dir.path());
        let contents = listing.read(DIRECTORY_URI).unwrap().unwrap();
        assert_eq!(
            contents.text,
            "Directory contents:\n  a.txt\n  archive/\n  b.txt\n  script.sh\n  users.json"
        );
        assert!(listing.read("file://other").unwrap().is_none());
    }
}
