//! WebSocket signaling server for the peerlink rendezvous relay
//!
//! Accepts websocket connections, assigns each one a short rendezvous code,
//! and relays call-signaling envelopes between endpoints. All state lives in
//! memory for the lifetime of the process; endpoints re-identify after a
//! restart. A client may pass `?code=XXXX` on the upgrade URI to recover the
//! code from a previous session.

mod connection;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use peerlink_signal_core::{CodeConfig, SignalingRelay};

use crate::connection::ConnectionTable;

/// Rendezvous and signaling relay for direct peer transports.
#[derive(Debug, Parser)]
#[command(name = "peerlink-signal", version, about)]
struct Args {
    /// Address to listen on for websocket connections
    #[arg(long, env = "PEERLINK_LISTEN", default_value = "0.0.0.0:3001")]
    listen: SocketAddr,

    /// Number of characters in a rendezvous code
    #[arg(long, env = "PEERLINK_CODE_LENGTH", default_value_t = 4)]
    code_length: usize,

    /// Alphabet rendezvous codes are drawn from
    #[arg(
        long,
        env = "PEERLINK_CODE_ALPHABET",
        default_value = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789"
    )]
    code_alphabet: String,

    /// Log filter, e.g. "info" or "peerlink_signal_core=debug"
    #[arg(long, env = "PEERLINK_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).context("invalid log filter")?)
        .init();

    let config = CodeConfig::new(&args.code_alphabet, args.code_length)
        .context("invalid code configuration")?;
    info!(
        alphabet = config.alphabet.len(),
        length = config.length,
        capacity = %config.capacity(),
        "code space configured"
    );

    let table = Arc::new(ConnectionTable::new());
    let relay = Arc::new(SignalingRelay::new(config, table.clone()));

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "signaling relay listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "accept failed");
                continue;
            }
        };
        let relay = relay.clone();
        let table = table.clone();
        tokio::spawn(async move {
            if let Err(err) = connection::handle_connection(stream, peer_addr, relay, table).await {
                debug!(%peer_addr, error = %err, "connection ended with error");
            }
        });
    }
}
