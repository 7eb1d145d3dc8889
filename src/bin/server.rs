// ABOUTME: chatrelay-server binary — starts the server engine and blocks until Ctrl-C
// ABOUTME: Parses CLI args with argh, installs a tracing subscriber, runs the shutdown sequence on exit

use argh::FromArgs;
use chatrelay::server::Server;
use chatrelay::ServerConfig;
use std::error::Error;
use std::net::Ipv4Addr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// The chat relay server
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// address to bind to (default: 0.0.0.0)
    #[argh(option)]
    addr: Option<Ipv4Addr>,

    /// port to bind to (default: 2024)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// server display name returned to REQHOST queries (default: chatrelay-server)
    #[argh(option)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = ServerConfig::new(cli_args.name.unwrap_or_else(|| "chatrelay-server".to_string()));
    if let Some(addr) = cli_args.addr {
        config = config.with_addr(addr);
    }
    if let Some(port) = cli_args.port {
        config = config.with_port(port);
    }

    let server = Server::new(config);
    let handle = server.spawn().await?;

    info!("server running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    handle.shutdown().await?;
    Ok(())
}
