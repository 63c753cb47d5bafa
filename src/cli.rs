//! Shared CLI fragments for the driftsync binary

use clap::Parser;
use std::path::PathBuf;

/// Options for one peer instance
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Peer-to-peer directory synchronization over UDP")]
pub struct PeerOpts {
    /// Local UDP listen port
    pub listen_port: u16,

    /// Peer address (host:port)
    pub peer: String,

    /// Directory to keep in sync
    pub dir: PathBuf,

    /// Shared HMAC secret; both peers must agree
    #[arg(long, default_value = crate::protocol::DEFAULT_KEY)]
    pub key: String,

    /// Append event lines to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
