use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use replyport_rpc::{Completion, PeerEvent};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    addr: &'a str,
    timestamp: String,
}

/// Announce the bound hub address. Always printed, so scripts binding port 0
/// can discover it.
pub fn print_listening(addr: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => emit_json(&ListeningOutput {
            event: "hub:listening",
            addr,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("listening on ws://{addr}"),
        OutputFormat::Raw => println!("{addr}"),
    }
    flush();
}

#[derive(Serialize)]
struct PeerEventOutput<'a> {
    event: &'static str,
    peer_id: &'a str,
    name: &'a str,
    version: &'a str,
    timestamp: String,
}

pub fn print_peer_event(event: &PeerEvent, format: OutputFormat) {
    let peer = &event.peer;
    match format {
        OutputFormat::Json => emit_json(&PeerEventOutput {
            event: event.kind.as_str(),
            peer_id: &peer.id,
            name: &peer.name,
            version: &peer.version,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "PEER", "NAME", "VERSION"])
                .add_row(vec![
                    event.kind.as_str().to_string(),
                    peer.id.clone(),
                    peer.name.clone(),
                    peer.version.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "{} peer={} name={} version={}",
            event.kind, peer.id, peer.name, peer.version
        ),
        OutputFormat::Raw => println!("{} {}", event.kind, peer.id),
    }
    flush();
}

/// Outcome of one `exec` call plus the run's completion.
#[derive(Debug, Serialize)]
pub struct ExecOutput<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completion: &'a Completion,
}

pub fn print_exec(out: &ExecOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => emit_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CALL", "RESULT", "RUN", "FINISH"])
                .add_row(vec![
                    out.name.to_string(),
                    call_summary(out),
                    out.completion.run_id.clone(),
                    finish_summary(out.completion),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "call={} result={} run={} finish={}",
            out.name,
            call_summary(out),
            out.completion.run_id,
            finish_summary(out.completion)
        ),
        OutputFormat::Raw => {
            if let Some(result) = out.result {
                println!("{result}");
            }
        }
    }
    flush();
}

fn call_summary(out: &ExecOutput<'_>) -> String {
    match (&out.result, &out.error) {
        (Some(result), _) => result.to_string(),
        (None, Some(error)) => format!("error: {error}"),
        (None, None) => "-".to_string(),
    }
}

fn finish_summary(completion: &Completion) -> String {
    match &completion.error_message {
        Some(message) => format!("{} ({message})", completion.reason),
        None => completion.reason.to_string(),
    }
}

fn emit_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn flush() {
    let _ = std::io::stdout().flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
