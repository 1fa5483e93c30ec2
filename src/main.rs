mod commands;
mod config;
mod ui;

use std::{fs, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use ftail::Ftail;

use config::{LogConfig, config_path, load_config};

/// Discover and invoke tools exposed by a provider over a byte stream.
#[derive(Parser)]
#[command(name = "toolwire", version, about)]
struct Cli {
    /// Config file (default: ~/.config/toolwire/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the provider on stdin/stdout
    Serve {
        /// Dispatch requests concurrently
        #[arg(long)]
        pipelined: bool,
    },
    /// List the provider's tools
    Tools,
    /// Invoke one tool
    Call {
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Override caller.timeout_ms (0 waits forever)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List the provider's resources
    Resources,
    /// Read one resource
    Read { uri: String },
    /// Discover, call, and show how failures come back
    Demo {
        #[arg(long, default_value = "Alice")]
        name: String,
    },
}

fn init_logging(log: &LogConfig) -> Result<()> {
    let level = log.level_filter()?;
    if let Some(parent) = log.file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    // Never log to stdout: it carries protocol frames under `serve`.
    Ftail::new()
        .single_file(log.file.as_path(), true, level)
        .init()
        .map_err(|e| anyhow!("initialising logging: {e:?}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(config_path);
    let mut cfg = load_config(&path)?;
    if let Some(level) = cli.log_level {
        cfg.log.level = level;
    }
    init_logging(&cfg.log)?;

    match cli.command {
        Cmd::Serve { pipelined } => commands::serve(&cfg, pipelined),
        Cmd::Tools => commands::tools(&cfg, &path),
        Cmd::Call {
            tool,
            args,
            timeout_ms,
        } => commands::call(&cfg, &path, &tool, &args, timeout_ms),
        Cmd::Resources => commands::resources(&cfg, &path),
        Cmd::Read { uri } => commands::read(&cfg, &path, &uri),
        Cmd::Demo { name } => commands::demo(&cfg, &path, &name),
    }
}
