use replyport_rpc::{Agent, EndpointConfig, HandlerTable, PeerIdentity};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, AgentArgs};
use crate::exit::{rpc_error, CliResult, FAILURE, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: AgentArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = EndpointConfig::default().with_call_timeout(parse_duration(&args.timeout)?);
    let identity = PeerIdentity::new(args.id.as_str(), args.name.as_str(), args.peer_version.as_str());
    let endpoint = Agent::new(identity)
        .with_config(config)
        .with_handlers(builtin_handlers(&args.id))
        .connect(&args.url)
        .await
        .map_err(|err| rpc_error("connect failed", err))?;
    info!(url = %args.url, peer = %args.id, "agent connected");

    let shutdown = CancellationToken::new();
    install_ctrlc_handler(shutdown.clone())?;

    tokio::select! {
        _ = shutdown.cancelled() => {
            endpoint.close();
            Ok(SUCCESS)
        }
        _ = endpoint.closed() => {
            info!(reason = ?endpoint.close_reason(), "hub closed the connection");
            Ok(FAILURE)
        }
    }
}

fn builtin_handlers(peer_id: &str) -> HandlerTable {
    let handlers = HandlerTable::new();
    handlers.on("echo", |_, args| async move { Ok(Value::Array(args)) });
    let id = peer_id.to_string();
    handlers.on("ping", move |_, _| {
        let reply = json!({ "pong": id });
        async move { Ok(reply) }
    });
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use replyport_rpc::CallContext;

    #[tokio::test]
    async fn builtins_answer() {
        let handlers = builtin_handlers("agent-1");
        let ping = handlers.get("ping").unwrap();
        assert_eq!(
            ping(CallContext::default(), vec![]).await.unwrap(),
            json!({"pong": "agent-1"})
        );
        let echo = handlers.get("echo").unwrap();
        assert_eq!(
            echo(CallContext::default(), vec![json!(1), json!("a")]).await.unwrap(),
            json!([1, "a"])
        );
    }
}
