use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("replyport {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: replyport");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("REPLYPORT_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "transports: worker=true, duplex_port={}, websocket=true",
        cfg!(unix)
    );
    println!(
        "defaults: call_timeout={:?}, ack_timeout={:?}, deadline={:?}",
        replyport_rpc::DEFAULT_CALL_TIMEOUT,
        replyport_rpc::hub::DEFAULT_ACK_TIMEOUT,
        replyport_rpc::INTERACTIVE_DEADLINE
    );

    Ok(SUCCESS)
}
