mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "replyport", version, about = "Request/reply over message channels")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let logs = cmd::LogArgs {
        format: cli.log_format,
        level: cli.log_level,
    };
    let result = cmd::run(cli.command, format, logs);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exec_subcommand() {
        let cli = Cli::try_parse_from([
            "replyport",
            "exec",
            "echo",
            "[1, 2]",
            "--deadline",
            "30s",
            "--timeout",
            "500ms",
        ])
        .expect("exec args should parse");

        assert!(matches!(cli.command, Command::Exec(_)));
    }

    #[test]
    fn parses_agent_identity() {
        let cli = Cli::try_parse_from([
            "replyport",
            "agent",
            "ws://127.0.0.1:7070",
            "--id",
            "browser-1",
            "--name",
            "Chrome",
            "--peer-version",
            "123",
        ])
        .expect("agent args should parse");

        match cli.command {
            Command::Agent(args) => assert_eq!(args.id, "browser-1"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn agent_requires_an_id() {
        let err = Cli::try_parse_from(["replyport", "agent", "ws://127.0.0.1:7070"])
            .expect_err("missing --id should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_hub_with_timeouts() {
        let cli = Cli::try_parse_from(["replyport", "hub", "127.0.0.1:0", "--ack-timeout", "3s"])
            .expect("hub args should parse");
        assert!(matches!(cli.command, Command::Hub(_)));
    }
}
