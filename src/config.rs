use anyhow::{Context, Result, anyhow};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use toolwire_mcp::{
    CallerOptions, DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_IN_FLIGHT, ProviderOptions, TimeoutPolicy,
};

/// Returns the path to ~/.config/toolwire/config.toml (or the platform equivalent).
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("toolwire")
        .join("config.toml")
}

/// Everything read from config.toml. Missing sections and keys fall back to
/// their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub caller: CallerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub pipelined: bool,
    /// Worker threads when pipelined.
    pub max_in_flight: usize,
    pub max_frame_bytes: usize,
    /// Where `write_note` and `create_sample_data` put their files, and
    /// where the file resources are read from.
    pub notes_dir: PathBuf,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            pipelined: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            notes_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    /// 0 disables the timeout.
    pub timeout_ms: u64,
    pub on_timeout: TimeoutPolicy,
    pub max_frame_bytes: usize,
    /// Program and arguments that start a provider speaking on stdio.
    /// When unset, this executable is re-run with `serve`.
    pub provider_command: Option<Vec<String>>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            on_timeout: TimeoutPolicy::Close,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            provider_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub file: PathBuf,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("toolwire.log"),
            level: "info".into(),
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.level)
            .map_err(|_| anyhow!("invalid log level {:?}", self.level))
    }
}

impl Config {
    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            pipelined: self.provider.pipelined,
            max_in_flight: self.provider.max_in_flight,
            max_frame_bytes: self.provider.max_frame_bytes,
        }
    }

    pub fn caller_options(&self) -> CallerOptions {
        CallerOptions {
            timeout: timeout_from_ms(self.caller.timeout_ms),
            on_timeout: self.caller.on_timeout,
            max_frame_bytes: self.caller.max_frame_bytes,
        }
    }
}

pub fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Load config.toml. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
