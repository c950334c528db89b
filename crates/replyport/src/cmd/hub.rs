use std::sync::Arc;

use replyport_rpc::{Hub, HubConfig, PeerEventKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, load_schemas, parse_duration, HubArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_listening, print_peer_event, OutputFormat};

pub async fn run(args: HubArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = HubConfig::default()
        .with_ack_timeout(parse_duration(&args.ack_timeout)?)
        .with_handshake_timeout(parse_duration(&args.handshake_timeout)?);
    if let Some(dir) = &args.schema_dir {
        let schemas = load_schemas(dir)?;
        info!(dir = %dir.display(), schemas = ?schemas.names(), "schemas loaded");
        let endpoint = config.endpoint.clone().with_schemas(Arc::clone(&schemas));
        config = config.with_schemas(schemas).with_endpoint(endpoint);
    }
    let hub = Hub::bind(args.addr.as_str(), config)
        .await
        .map_err(|err| rpc_error("bind failed", err))?;
    print_listening(&hub.local_addr().to_string(), format);

    let shutdown = CancellationToken::new();
    install_ctrlc_handler(shutdown.clone())?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    for kind in [PeerEventKind::Connected, PeerEventKind::Disconnected] {
        let tx = events_tx.clone();
        hub.listen(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    drop(events_tx);

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                print_peer_event(&event, format);
                seen = seen.saturating_add(1);
                if args.count.is_some_and(|count| seen >= count) {
                    break;
                }
            }
        }
    }

    info!("hub stopping");
    hub.shutdown();
    Ok(SUCCESS)
}
