// ABOUTME: chatrelay-client binary — connects, registers a name, and runs a line-oriented REPL
// ABOUTME: Commands: gettime, gethost, getcli, send <id> "text", help, exit/disconnect

use argh::FromArgs;
use chatrelay::client::{self, ClientEvent, SendOutcome};
use chatrelay::ClientConfig;
use std::error::Error;
use std::net::Ipv4Addr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// The chat relay client
#[derive(FromArgs)]
struct CliArgs {
    /// display name to register with the server
    #[argh(positional)]
    name: String,

    /// whether or not to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// address to connect to (default: 127.0.0.1)
    #[argh(option)]
    addr: Option<Ipv4Addr>,

    /// port to connect to (default: 2024)
    #[argh(option, short = 'p')]
    port: Option<u16>,
}

const HELP_TEXT: &str = "\
commands:
  gettime              request the server's current time
  gethost              request the server's display name
  getcli               request the list of connected clients
  send <id> \"text\"     send text to another client by id
  help                 show this message
  exit | disconnect    disconnect and quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = ClientConfig::new(cli_args.name);
    if let Some(addr) = cli_args.addr {
        config = config.with_addr(addr);
    }
    if let Some(port) = cli_args.port {
        config = config.with_port(port);
    }

    let (handle, mut events) = client::connect(config).await?;
    info!("connected; type 'help' for commands");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match handle_command(&line, &handle).await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => println!("error: {e}"),
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => print_event(event),
                    None => break,
                }
            }
        }
    }

    Ok(())
}

/// Returns `Ok(true)` if the REPL should exit.
async fn handle_command(line: &str, handle: &client::ClientHandle) -> Result<bool, client::ClientError> {
    let line = line.trim();
    let mut parts = line.splitn(2, char::is_whitespace);
    match parts.next().unwrap_or("") {
        "" => {}
        "help" => println!("{HELP_TEXT}"),
        "gettime" => handle.get_time().await?,
        "gethost" => handle.get_host().await?,
        "getcli" => handle.get_clients().await?,
        "send" => {
            let rest = parts.next().unwrap_or("").trim();
            let mut send_parts = rest.splitn(2, char::is_whitespace);
            let Some(id) = send_parts.next().and_then(|s| s.parse::<u8>().ok()) else {
                println!("usage: send <id> \"text\"");
                return Ok(false);
            };
            let text = send_parts.next().unwrap_or("").trim().trim_matches('"');
            handle.send_message(id, text).await?;
        }
        "exit" | "disconnect" => {
            handle.disconnect().await?;
            return Ok(true);
        }
        other => println!("unknown command: {other} (type 'help')"),
    }
    Ok(false)
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Time { formatted, .. } => println!("server time: {formatted}"),
        ClientEvent::Host(name) => println!("server name: {name}"),
        ClientEvent::ClientList(entries) => {
            println!("connected clients:");
            for entry in entries {
                println!("  {} {} ({}:{})", entry.id, entry.name, entry.ip, entry.port);
            }
        }
        ClientEvent::SendResult { receiver_id, outcome } => match outcome {
            SendOutcome::Delivered => println!("message to {receiver_id} delivered"),
            SendOutcome::Failed(reason) => println!("message to {receiver_id} failed: {reason}"),
        },
        ClientEvent::Message { sender_id, text } => println!("[{sender_id}] {text}"),
        ClientEvent::Disconnected => println!("disconnected from server"),
    }
}
