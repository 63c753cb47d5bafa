//! driftsync - peer-to-peer directory synchronization over UDP
//!
//! Two peers watch one directory each, exchange authenticated inventory
//! announcements, and stream the files the other side is missing as
//! acknowledged datagram chunk sequences.

use anyhow::{bail, Context, Result};
use clap::Parser;
use driftsync::cli::PeerOpts;
use driftsync::logger::{ConsoleLogger, EventLog, TextLogger};
use driftsync::peer::{PeerConfig, PeerHandle};
use std::net::ToSocketAddrs;
use std::sync::Arc;

fn main() -> Result<()> {
    let opts = PeerOpts::parse();

    let peer = opts
        .peer
        .to_socket_addrs()
        .with_context(|| format!("resolve peer address {}", opts.peer))?
        .next()
        .with_context(|| format!("peer address {} resolved to nothing", opts.peer))?;

    if !opts.dir.is_dir() {
        bail!("watched path {} is not a directory", opts.dir.display());
    }

    let logger: Arc<dyn EventLog> = match &opts.log_file {
        Some(path) => Arc::new(TextLogger::new(path)?),
        None => Arc::new(ConsoleLogger),
    };

    let handle = PeerHandle::spawn(PeerConfig {
        listen_port: opts.listen_port,
        peer,
        dir: opts.dir,
        secret: opts.key.into_bytes(),
        logger,
    })?;

    handle.join();
    Ok(())
}
