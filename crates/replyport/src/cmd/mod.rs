use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use replyport_schema::{SchemaError, SchemaRegistry, PEER_IDENTITY};
use tokio_util::sync::CancellationToken;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, INTERNAL, USAGE};
use crate::logging::{LogFormat, LogLevel};
use crate::output::OutputFormat;

pub mod agent;
pub mod exec;
pub mod hub;
pub mod version;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a WebSocket hub and print peer connect/disconnect events.
    Hub(HubArgs),
    /// Connect to a hub as a peer and serve `echo`/`ping`.
    Agent(AgentArgs),
    /// Run one call in a supervised worker process.
    Exec(ExecArgs),
    /// Child side of `exec`; reads its bootstrap line from stdin.
    #[command(hide = true)]
    Worker(WorkerArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Logging flags of the current process, forwarded to spawned workers.
#[derive(Debug, Clone, Copy)]
pub struct LogArgs {
    pub format: LogFormat,
    pub level: LogLevel,
}

pub fn run(command: Command, format: OutputFormat, logs: LogArgs) -> CliResult<i32> {
    match command {
        Command::Hub(args) => block_on(hub::run(args, format)),
        Command::Agent(args) => block_on(agent::run(args, format)),
        Command::Exec(args) => block_on(exec::run(args, format, logs)),
        Command::Worker(args) => block_on(worker::run(args)),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct HubArgs {
    /// Address to listen on.
    #[arg(env = "REPLYPORT_HUB_ADDR", default_value = "127.0.0.1:7070")]
    pub addr: String,
    /// Bound on hub-initiated calls to a peer (e.g. 10s, 500ms).
    #[arg(long, env = "REPLYPORT_ACK_TIMEOUT", default_value = "10s")]
    pub ack_timeout: String,
    /// Time a connection has to present its identity.
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
    /// Exit after N peer events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Directory of `<name>.schema.json` files; a `peer-identity` schema
    /// there replaces the built-in one.
    #[arg(long, env = "REPLYPORT_SCHEMA_DIR")]
    pub schema_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Hub URL, e.g. ws://127.0.0.1:7070.
    #[arg(env = "REPLYPORT_HUB_URL")]
    pub url: String,
    /// Peer id to register under.
    #[arg(long)]
    pub id: String,
    /// Peer display name.
    #[arg(long, default_value = "replyport")]
    pub name: String,
    /// Peer version string.
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub peer_version: String,
    /// Per-call timeout for calls this agent makes (e.g. 10s).
    #[arg(long, env = "REPLYPORT_CALL_TIMEOUT", default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Handler to call in the worker: echo, sleep, fail, exit.
    pub name: String,
    /// Arguments as a JSON array; any other JSON value is passed as the
    /// single argument.
    pub args: Option<String>,
    /// Lifetime bound of the worker (e.g. 2m is the default; 0 disables).
    #[arg(long, default_value = "120s")]
    pub deadline: String,
    /// Per-call timeout (e.g. 10s, 500ms).
    #[arg(long, env = "REPLYPORT_CALL_TIMEOUT", default_value = "10s")]
    pub timeout: String,
    /// Run id reported in the completion.
    #[arg(long, default_value = "exec")]
    pub run_id: String,
    /// Directory of `<name>.schema.json` files the worker checks call
    /// arguments against.
    #[arg(long, env = "REPLYPORT_SCHEMA_DIR")]
    pub schema_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct WorkerArgs {
    #[arg(long)]
    pub schema_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(future)
}

/// Load a schema directory, keeping the built-in `peer-identity` schema
/// unless the directory provides its own.
pub(crate) fn load_schemas(dir: &Path) -> CliResult<Arc<SchemaRegistry>> {
    let schema_error =
        |err: SchemaError| CliError::new(DATA_INVALID, format!("schema load failed: {err}"));
    let mut registry = SchemaRegistry::from_directory(dir).map_err(schema_error)?;
    if !registry.has_schema(PEER_IDENTITY) {
        registry.register_builtins().map_err(schema_error)?;
    }
    Ok(Arc::new(registry))
}

/// Cancel `token` on Ctrl-C.
pub(crate) fn install_ctrlc_handler(token: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || token.cancel()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = input.strip_suffix('m') {
        (num, "m")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

/// Like [`parse_duration`], but `0` and `none` disable the bound.
pub(crate) fn parse_deadline(input: &str) -> CliResult<Option<Duration>> {
    match input.trim() {
        "0" | "none" => Ok(None),
        other => parse_duration(other).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn schema_dir_keeps_builtin_identity() {
        let dir = std::env::temp_dir().join(format!("replyport-cli-schemas-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("echo.schema.json"), r#"{"type":"array"}"#).unwrap();

        let registry = load_schemas(&dir).unwrap();
        assert_eq!(registry.names(), vec!["echo", PEER_IDENTITY]);
        assert!(load_schemas(&dir.join("missing")).is_err_and(|err| err.code == DATA_INVALID));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn deadline_can_be_disabled() {
        assert_eq!(parse_deadline("0").unwrap(), None);
        assert_eq!(parse_deadline("none").unwrap(), None);
        assert_eq!(parse_deadline("2m").unwrap(), Some(Duration::from_secs(120)));
    }
}
