use std::{
    io,
    path::Path,
    process::Command,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde_json::json;
use toolwire_mcp::{
    Arguments, CallError, CallerEngine, ChildTransport, ProviderEngine, builtin_registry,
    builtin_resources, resources::STATUS_URI,
};

use crate::{
    config::{Config, timeout_from_ms},
    ui::render,
};

/// Run the provider on stdin/stdout until the caller hangs up.
pub fn serve(cfg: &Config, pipelined: bool) -> Result<()> {
    let registry = builtin_registry(&cfg.provider.notes_dir)?;
    let resources = builtin_resources(&cfg.provider.notes_dir, registry.len());
    let mut options = cfg.provider_options();
    options.pipelined |= pipelined;

    let mut engine = ProviderEngine::with_options(registry, options).with_resources(resources);
    let summary = engine
        .serve(io::stdin().lock(), io::stdout())
        .context("provider session failed")?;
    info!("provider done: {summary:?}");
    Ok(())
}

/// Start a provider process and connect to it.
fn connect(cfg: &Config, config_path: &Path) -> Result<CallerEngine> {
    let command = match &cfg.caller.provider_command {
        Some(argv) => {
            let Some((program, args)) = argv.split_first() else {
                bail!("caller.provider_command is empty");
            };
            let mut command = Command::new(program);
            command.args(args);
            command
        }
        None => {
            let exe = std::env::current_exe().context("locating the toolwire executable")?;
            let mut command = Command::new(exe);
            command
                .arg("--config")
                .arg(config_path)
                .arg("--log-level")
                .arg(&cfg.log.level)
                .arg("serve");
            command
        }
    };
    info!("starting provider: {command:?}");

    let transport = ChildTransport::spawn(command).context("spawning the provider")?;
    let caller = CallerEngine::connect(transport, cfg.caller_options())
        .context("connecting to the provider")?;
    Ok(caller)
}

pub fn tools(cfg: &Config, config_path: &Path) -> Result<()> {
    let caller = connect(cfg, config_path)?;
    let tools = caller.discover()?;
    render::heading(&format!("{} tool(s) available", tools.len()));
    render::print_tools(&tools);
    caller.close()?;
    Ok(())
}

pub fn call(
    cfg: &Config,
    config_path: &Path,
    tool: &str,
    args: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let arguments: Arguments =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    let timeout = match timeout_ms {
        Some(ms) => timeout_from_ms(ms),
        None => timeout_from_ms(cfg.caller.timeout_ms),
    };

    let caller = connect(cfg, config_path)?;
    let result = caller.invoke_with_timeout(tool, arguments, timeout);
    if let Err(err) = &result {
        render::print_call_error(err);
    }
    let value = finish(&caller, result).with_context(|| format!("calling {tool}"))?;
    render::print_result(&value);
    Ok(())
}

pub fn resources(cfg: &Config, config_path: &Path) -> Result<()> {
    let caller = connect(cfg, config_path)?;
    let result = caller.list_resources();
    if let Err(err) = &result {
        render::print_call_error(err);
    }
    let resources = finish(&caller, result).context("listing resources")?;
    render::heading(&format!("{} resource(s) available", resources.len()));
    render::print_resources(&resources);
    Ok(())
}

pub fn read(cfg: &Config, config_path: &Path, uri: &str) -> Result<()> {
    let caller = connect(cfg, config_path)?;
    let result = caller.read_resource(uri);
    if let Err(err) = &result {
        render::print_call_error(err);
    }
    let contents = finish(&caller, result).with_context(|| format!("reading {uri}"))?;
    render::print_contents(&contents);
    Ok(())
}

/// Close the session and hand back `result`. A failed close is only logged
/// when the request itself failed, so it never hides the request's error.
fn finish<T>(caller: &CallerEngine, result: Result<T, CallError>) -> Result<T> {
    match result {
        Ok(value) => {
            caller.close().context("closing the session")?;
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = caller.close() {
                warn!("closing the session after a failed request: {e}");
            }
            Err(err.into())
        }
    }
}

/// Walk through discovery, a few calls, and the ways a call can fail.
pub fn demo(cfg: &Config, config_path: &Path, name: &str) -> Result<()> {
    let caller = connect(cfg, config_path)?;

    render::heading("Discovering available tools");
    let tools = caller.discover()?;
    render::print_tools(&tools);

    render::heading("\nCalling say_hello");
    let greeting = caller.invoke("say_hello", arguments(json!({ "name": name })))?;
    render::print_result(&greeting);

    render::heading("\nCalling get_time");
    let now = caller.invoke("get_time", Arguments::new())?;
    render::print_result(&now);

    render::heading("\nCalling a tool that does not exist");
    expect_failure(caller.invoke("make_coffee", Arguments::new()))?;

    render::heading("\nCalling say_hello with a number for a name");
    expect_failure(caller.invoke("say_hello", arguments(json!({ "name": 42 }))))?;

    render::heading("\nCalling say_hello after the failures");
    let greeting = caller.invoke_with_timeout(
        "say_hello",
        arguments(json!({ "name": "again" })),
        Some(Duration::from_secs(5)),
    )?;
    render::print_result(&greeting);

    render::heading("\nListing resources");
    let resources = caller.list_resources()?;
    render::print_resources(&resources);

    render::heading("\nCreating sample data, then reading it back");
    let created = caller.invoke(
        "create_sample_data",
        arguments(json!({ "filename": "users" })),
    )?;
    render::print_result(&created);
    let users = caller.read_resource("file://users.json")?;
    render::print_contents(&users);

    render::heading("\nReading the server status");
    let status = caller.read_resource(STATUS_URI)?;
    render::print_contents(&status);

    render::heading("\nReading a resource that does not exist");
    expect_failure(caller.read_resource("file://nonexistent.txt"))?;

    caller.close()?;
    Ok(())
}

fn arguments(value: serde_json::Value) -> Arguments {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Arguments::new(),
    }
}

/// Print a remote failure; anything else aborts the demo.
fn expect_failure<T: std::fmt::Debug>(result: Result<T, CallError>) -> Result<()> {
    match result {
        Ok(value) => bail!("expected a failure, got {value:?}"),
        Err(err @ CallError::Remote(_)) => {
            render::print_call_error(&err);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
