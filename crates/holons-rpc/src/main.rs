//! Holons RPC - reference echo holon.
//!
//! Serves the echo service on any transport URI so clients can exercise
//! calls in both directions, heartbeats and reconnection against it.

mod handlers;

use anyhow::Result;
use clap::Parser;
use holons::{serve, HolonRpcServer, Scheme};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "holons-rpc")]
#[command(about = "Reference echo holon speaking Holon RPC")]
struct Args {
    /// Transport URI to listen on (tcp://, unix://, stdio://, mem://)
    #[arg(long)]
    listen: Option<String>,

    /// TCP port to listen on when --listen is not given
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout may be the transport itself.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let port = args.port.map(|p| p.to_string());
    let uri = serve::listen_uri(args.listen.as_deref(), port.as_deref());
    info!("Starting echo holon on {}", uri);

    let server = HolonRpcServer::start(&uri, handlers::echo_handlers()).await?;

    // Print the resolved address for the parent process to read
    if holons::transport::scheme(&uri) != Scheme::Stdio.as_str() {
        println!("{}", server.address());
    }

    info!("Echo holon running on {}", server.address());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
