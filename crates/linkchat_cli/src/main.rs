//! Terminal front-end for the linkchat engine.
//!
//! One subcommand per role: `listen` runs the acceptor, `connect` dials a
//! peer, `discover` scans the subnet and exits. The chat loop reads stdin
//! lines and broadcasts them; engine events are rendered by a separate
//! task so slow terminals never stall the engine.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use linkchat_engine::{ChatEngine, EngineConfig, EngineEvent, Peer, SendOutcome, TcpTransport};

const CONFIG_FILE: &str = "linkchat.json";

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,linkchat_engine=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn print_usage() {
    eprintln!("usage: linkchat <command>");
    eprintln!();
    eprintln!("commands:");
    eprintln!("  listen                accept connections on the configured port");
    eprintln!("  connect <addr>        connect to a peer (ip or ip:port)");
    eprintln!("  discover <local-ip>   scan the local subnet for peers");
    eprintln!();
    eprintln!("chat commands: /peers lists connections, /quit exits.");
    eprintln!("settings are read from {CONFIG_FILE} when present.");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "help".to_string());

    let config = EngineConfig::load_or_default(Path::new(CONFIG_FILE));
    let engine = ChatEngine::new(TcpTransport, config);

    match command.as_str() {
        "listen" => {
            let addr = engine.start_accepting().await?;
            println!("listening on {addr}");
            chat_loop(&engine).await?;
        }
        "connect" => {
            let target = args.next().context("usage: linkchat connect <addr>")?;
            engine.connect_to(&Peer::discovered(target)).await?;
            println!("connected");
            chat_loop(&engine).await?;
        }
        "discover" => {
            let local_ip: IpAddr = args
                .next()
                .context("usage: linkchat discover <local-ip>")?
                .parse()
                .context("local ip does not parse")?;
            run_discovery(&engine, local_ip).await?;
        }
        _ => {
            print_usage();
            return Ok(());
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Read stdin lines and broadcast them until `/quit` or EOF.
async fn chat_loop(engine: &ChatEngine<TcpTransport>) -> Result<()> {
    let printer = tokio::spawn(print_events(engine.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/quit" => break,
            "/peers" => {
                let peers = engine.connected_peers().await;
                if peers.is_empty() {
                    println!("(no peers connected)");
                }
                for peer in peers {
                    println!("{} ({})", peer.id, peer.display_name);
                }
            }
            text => match engine.send(text).await {
                Ok(SendOutcome::NoPeers) => println!("(no peers connected, nothing sent)"),
                Ok(SendOutcome::Sent { failed, .. }) => {
                    for peer in failed {
                        warn!("delivery to {peer} failed, connection closed");
                    }
                }
                Err(e) => error!("send failed: {e}"),
            },
        }
    }

    printer.abort();
    Ok(())
}

/// Run one discovery scan and exit when it signs off.
async fn run_discovery(engine: &ChatEngine<TcpTransport>, local_ip: IpAddr) -> Result<()> {
    let mut events = engine.subscribe();
    engine.discover_devices(local_ip)?;
    println!("scanning from {local_ip} ...");

    loop {
        match events.recv().await {
            Ok(EngineEvent::DeviceDiscovered(peer)) => {
                println!("found {} ({})", peer.id, peer.display_name);
            }
            Ok(EngineEvent::DiscoveryFinished { peers_found }) => {
                println!("scan finished: {peers_found} peer(s) found");
                break;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

/// Render engine events to the terminal.
async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::MessageReceived(message)) => {
                println!("[{}] {}", message.sender_id, message.text);
            }
            Ok(EngineEvent::PeerConnected(peer)) => {
                println!("* {peer} connected");
            }
            Ok(EngineEvent::PeerDisconnected(peer)) => {
                println!("* {peer} disconnected");
            }
            Ok(EngineEvent::ConnectionStatusChanged { connected }) => {
                if !connected {
                    println!("* no peers connected");
                }
            }
            Ok(EngineEvent::ConnectionFailed { peer, reason }) => {
                println!("* connection to {peer} failed: {reason}");
            }
            Ok(EngineEvent::DeviceDiscovered(peer)) => {
                println!("* discovered {peer_id} ({name})", peer_id = peer.id, name = peer.display_name);
            }
            Ok(EngineEvent::DiscoveryFinished { peers_found }) => {
                println!("* discovery finished, {peers_found} peer(s) found");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event stream lagged, {skipped} event(s) dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
