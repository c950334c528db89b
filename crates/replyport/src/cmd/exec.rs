use replyport_rpc::{Endpoint, FinishReason, RpcError, Supervisor, SupervisorConfig};
use serde_json::{json, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cmd::worker::FINISH;
use crate::cmd::{install_ctrlc_handler, parse_deadline, parse_duration, ExecArgs, LogArgs};
use crate::exit::{finish_code, io_error, rpc_error, CliError, CliResult, FAILURE, TIMEOUT, USAGE};
use crate::output::{print_exec, ExecOutput, OutputFormat};

pub async fn run(args: ExecArgs, format: OutputFormat, logs: LogArgs) -> CliResult<i32> {
    let call_args = parse_call_args(args.args.as_deref())?;
    let timeout = parse_duration(&args.timeout)?;
    let config = SupervisorConfig::default().with_deadline(parse_deadline(&args.deadline)?);

    let exe = std::env::current_exe().map_err(|err| io_error("cannot locate own binary", err))?;
    let mut command = Command::new(exe);
    command
        .arg("--log-format")
        .arg(logs.format.as_arg())
        .arg("--log-level")
        .arg(logs.level.as_arg())
        .arg("worker");
    if let Some(dir) = &args.schema_dir {
        command.arg("--schema-dir").arg(dir);
    }

    let supervisor = Supervisor::new(config);
    let run = supervisor
        .run_process(
            args.run_id.as_str(),
            command,
            json!({ "call": args.name.as_str() }),
        )
        .await
        .map_err(|err| rpc_error("worker launch failed", err))?;
    info!(run_id = %run.id(), call = %args.name, "worker started");

    let shutdown = CancellationToken::new();
    install_ctrlc_handler(shutdown.clone())?;

    let endpoint = run.endpoint().clone();
    let call = tokio::select! {
        _ = shutdown.cancelled() => None,
        outcome = endpoint.invoke_with_timeout(&args.name, call_args, timeout) => Some(outcome),
    };

    let (result, error, call_code) = match call {
        Some(Ok(value)) => {
            // Let the worker report the result as its finish value.
            if let Err(err) = endpoint.send(FINISH, vec![value.clone()]) {
                debug!(error = %err, "finish request not delivered");
            }
            (Some(value), None, None)
        }
        Some(Err(err)) => {
            if should_stop(&err, &endpoint) {
                run.stop();
            }
            let message = err.to_string();
            (None, Some(message), Some(rpc_error("call failed", err).code))
        }
        None => {
            run.stop();
            (None, Some("interrupted".to_string()), Some(FAILURE))
        }
    };

    let completion = run.wait().await;
    print_exec(
        &ExecOutput {
            name: &args.name,
            result: result.as_ref(),
            error,
            completion: &completion,
        },
        format,
    );

    Ok(match (completion.reason, call_code) {
        (FinishReason::Timeout, _) => TIMEOUT,
        (_, Some(code)) => code,
        (reason, None) => finish_code(reason),
    })
}

/// A closed channel means the worker is already gone; its own exit decides
/// the finish reason.
fn should_stop(err: &RpcError, endpoint: &Endpoint) -> bool {
    !matches!(err, RpcError::ChannelClosed) && !endpoint.is_closed()
}

fn parse_call_args(input: Option<&str>) -> CliResult<Vec<Value>> {
    let Some(input) = input else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("call arguments are not valid JSON: {err}")))?;
    Ok(match value {
        Value::Array(args) => args,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_args_accept_arrays_and_scalars() {
        assert_eq!(parse_call_args(None).unwrap(), Vec::<Value>::new());
        assert_eq!(
            parse_call_args(Some("[1, \"a\"]")).unwrap(),
            vec![json!(1), json!("a")]
        );
        assert_eq!(parse_call_args(Some("{\"ms\": 5}")).unwrap(), vec![json!({"ms": 5})]);
        assert_eq!(parse_call_args(Some("nope")).unwrap_err().code, USAGE);
    }

    #[tokio::test]
    async fn closed_channel_is_left_to_the_run() {
        let (host, _worker) = replyport_transport::worker_channel();
        let endpoint = Endpoint::new(host, replyport_rpc::EndpointConfig::default()).unwrap();
        let timeout = RpcError::Timeout(std::time::Duration::from_millis(300));

        assert!(!should_stop(&RpcError::ChannelClosed, &endpoint));
        assert!(should_stop(&timeout, &endpoint));

        endpoint.close();
        assert!(!should_stop(&timeout, &endpoint));
    }
}
