//! peerlink CLI and demo peer.
//!
//! Usage:
//!   peerlink pair initiate [--meta name=laptop]
//!   peerlink pair respond <shortcode> [--meta name=camera]
//!   peerlink pair list
//!   peerlink pair delete <pairing-id>
//!   peerlink connect <pairing-id>

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peerlink_pairing::{FilePairingStore, Pairing};
use peerlink_session::{ConnectionState, Peer, PeerConfig, TransportConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use config::Config;

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(about = "Pair devices and hold direct peer-to-peer sessions", long_about = None)]
struct Cli {
    /// Config file path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage pairings with other devices
    Pair {
        #[command(subcommand)]
        command: PairCommands,
    },
    /// Connect to a paired device and chat over the data channel
    Connect {
        /// Pairing to use
        pairing_id: String,
    },
}

#[derive(Subcommand)]
enum PairCommands {
    /// Create a pairing request and wait for the peer
    Initiate {
        /// Metadata entries shared with the peer, as key=value
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Respond to a shortcode shown on the other device
    Respond {
        shortcode: String,
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// List stored pairings
    List,
    /// Delete a stored pairing
    Delete { pairing_id: String },
}

fn parse_meta(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{input}'"))
}

fn metadata(entries: Vec<(String, String)>) -> HashMap<String, String> {
    entries.into_iter().collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    let store = Arc::new(FilePairingStore::new(&config.pairings_file));
    let pairing = Pairing::new(config.pairing_url.clone(), store);

    match cli.command {
        Commands::Pair { command } => run_pair(command, &pairing).await,
        Commands::Connect { pairing_id } => run_connect(&pairing_id, &config, &pairing).await,
    }
}

async fn run_pair(command: PairCommands, pairing: &Pairing) -> Result<()> {
    match command {
        PairCommands::Initiate { meta } => {
            let pending = pairing
                .initiate_pairing(metadata(meta))
                .await
                .context("creating pairing request")?;
            println!("Shortcode: {}", pending.shortcode);
            println!("Enter this code on the other device. Waiting...");

            let result = pending.complete().await.context("completing pairing")?;
            println!("Paired: {}", result.pairing_id);
            if !result.remote_metadata.is_empty() {
                println!("Peer metadata: {:?}", result.remote_metadata);
            }
        }
        PairCommands::Respond { shortcode, meta } => {
            let result = pairing
                .respond_to_pairing(&shortcode, metadata(meta))
                .await
                .context("responding to pairing")?;
            println!("Paired: {}", result.pairing_id);
            if !result.remote_metadata.is_empty() {
                println!("Peer metadata: {:?}", result.remote_metadata);
            }
        }
        PairCommands::List => {
            let mut ids = pairing.all_pairing_ids()?;
            ids.sort();
            if ids.is_empty() {
                println!("No pairings stored.");
            }
            for id in ids {
                println!("{id}");
            }
        }
        PairCommands::Delete { pairing_id } => {
            pairing.delete_pairing(&pairing_id)?;
            println!("Deleted {pairing_id}");
        }
    }
    Ok(())
}

async fn run_connect(pairing_id: &str, config: &Config, pairing: &Pairing) -> Result<()> {
    let credentials = pairing
        .credentials(pairing_id)
        .context("loading pairing credentials")?;

    let mut peer = Peer::new(
        PeerConfig {
            signalling_url: config.signalling_url.clone(),
            transport: TransportConfig {
                stun_servers: config.stun_servers.clone(),
                ..Default::default()
            },
        },
        Vec::new(),
    );

    peer.on_connection_state_change(|state| match state {
        ConnectionState::Connecting => println!("* connecting..."),
        ConnectionState::Connected => println!("* connected; type messages, ctrl-d to quit"),
        ConnectionState::Disconnected => println!("* disconnected"),
    });
    peer.on_string_message(|message| println!("peer: {message}"));
    peer.on_binary_message(|message| println!("peer sent {} bytes", message.len()));
    peer.on_error(|error| eprintln!("! {error}"));

    peer.connect(Arc::new(credentials));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.is_empty() => peer.send_string(&line).await,
                    Some(_) => {}
                    None => break, // stdin closed
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    peer.disconnect();
    Ok(())
}
