use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use tempfile::TempDir;

pub const BIN: &str = env!("CARGO_BIN_EXE_toolwire");

/// A scratch directory holding a config that keeps logs and notes inside it.
pub struct Sandbox {
    pub dir: TempDir,
    pub config: PathBuf,
}

impl Sandbox {
    pub fn new(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        let notes = dir.path().join("notes");
        fs::create_dir_all(&notes).unwrap();
        fs::write(
            &config,
            format!(
                "[provider]\nnotes_dir = {notes:?}\n\n[log]\nfile = {log:?}\nlevel = \"debug\"\n{extra}",
                notes = notes.display().to_string(),
                log = dir.path().join("toolwire.log").display().to_string(),
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `toolwire --config <sandbox config> <args...>`
    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(BIN);
        cmd.arg("--config").arg(&self.config).args(args);
        cmd
    }
}
