use std::time::Duration;

use replyport_rpc::{report_finish, Endpoint, EndpointConfig, HandlerResult};
use replyport_transport::{read_bootstrap, DuplexPort};
use serde_json::Value;
use tokio::io::BufReader;
use tracing::{debug, info, info_span, Instrument};

use crate::cmd::{load_schemas, WorkerArgs};
use crate::exit::{rpc_error, transport_error, CliResult, SUCCESS};

/// Event the parent sends to ask for a `run:finish` report.
pub const FINISH: &str = "finish";

pub async fn run(args: WorkerArgs) -> CliResult<i32> {
    let span = info_span!("worker", pid = std::process::id());
    async {
        let mut stdin = BufReader::new(tokio::io::stdin());
        let bootstrap = read_bootstrap(&mut stdin)
            .await
            .map_err(|err| transport_error("bootstrap failed", err))?;
        debug!(port = ?bootstrap.port, payload = %bootstrap.payload, "bootstrap received");

        let port = DuplexPort::connect(&bootstrap.port)
            .await
            .map_err(|err| transport_error("connect failed", err))?;
        let mut config = EndpointConfig::default();
        if let Some(dir) = &args.schema_dir {
            config = config.with_schemas(load_schemas(dir)?);
        }
        let endpoint = Endpoint::builder(config).build(port);
        register_handlers(&endpoint, bootstrap.payload);
        endpoint
            .start()
            .map_err(|err| rpc_error("worker start failed", err))?;
        info!("worker serving");

        // The parent closes the port once it has our finish report, or kills us.
        endpoint.closed().await;
        debug!(reason = ?endpoint.close_reason(), "worker channel closed");
        Ok(SUCCESS)
    }
    .instrument(span)
    .await
}

fn register_handlers(endpoint: &Endpoint, payload: Value) {
    endpoint.on("echo", |_, args| async move { Ok(Value::Array(args)) });
    endpoint.on("payload", move |_, _| {
        let payload = payload.clone();
        async move { Ok(payload) }
    });
    endpoint.on("sleep", |_, args| async move {
        let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::from(ms))
    });
    endpoint.on("fail", |_, args| async move { fail_with(args.first()) });
    endpoint.on("exit", |_, args| async move {
        let code = args
            .first()
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(1);
        info!(code, "exiting on request");
        exit_now(code)
    });

    let reporter = endpoint.clone();
    endpoint.on(FINISH, move |_, args| {
        report_finish(&reporter, args.into_iter().next().unwrap_or(Value::Null));
        async { Ok(Value::Null) }
    });
}

fn fail_with(message: Option<&Value>) -> HandlerResult {
    let message = message
        .and_then(Value::as_str)
        .unwrap_or("worker failure");
    Err(message.to_string())
}

fn exit_now(code: i32) -> HandlerResult {
    std::process::exit(code)
}
