//! Peer assembly: wires the tracker, receiver, sender and directory
//! monitor together and owns their threads.

use crate::liveness::Liveness;
use crate::logger::EventLog;
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::tracker::FileTracker;
use anyhow::{Context, Result};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct PeerConfig {
    pub listen_port: u16,
    pub peer: SocketAddr,
    pub dir: PathBuf,
    pub secret: Vec<u8>,
    pub logger: Arc<dyn EventLog>,
}

/// Handle over a running peer's threads.
pub struct PeerHandle {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl PeerHandle {
    /// Bind the listen socket and start the monitor, receiver and sender
    /// threads. A bind failure surfaces here, before any thread starts.
    pub fn spawn(cfg: PeerConfig) -> Result<PeerHandle> {
        let socket = UdpSocket::bind(("0.0.0.0", cfg.listen_port))
            .with_context(|| format!("bind udp port {}", cfg.listen_port))?;

        let tracker = Arc::new(FileTracker::new(&cfg.dir));
        let liveness = Arc::new(Liveness::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let receiver = Arc::new(Receiver::new(
            socket,
            cfg.peer,
            cfg.secret.clone(),
            tracker.clone(),
            liveness.clone(),
            cfg.logger.clone(),
        )?);
        let sender = Sender::new(
            cfg.peer,
            cfg.secret,
            tracker.clone(),
            liveness,
            cfg.logger.clone(),
        )?;

        let mut threads = Vec::new();

        {
            let tracker = tracker.clone();
            let running = running.clone();
            let logger = cfg.logger.clone();
            threads.push(
                thread::Builder::new()
                    .name("drift-monitor".into())
                    .spawn(move || tracker.run_monitor(&running, logger.as_ref()))
                    .context("spawn monitor thread")?,
            );
        }
        {
            let receiver = receiver.clone();
            let running = running.clone();
            threads.push(
                thread::Builder::new()
                    .name("drift-receiver".into())
                    .spawn(move || receiver.run(&running))
                    .context("spawn receiver thread")?,
            );
        }
        {
            let running = running.clone();
            threads.push(
                thread::Builder::new()
                    .name("drift-sender".into())
                    .spawn(move || sender.run(&running))
                    .context("spawn sender thread")?,
            );
        }

        Ok(PeerHandle { running, threads })
    }

    /// Signal every loop to stop and join the threads.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Relaxed);
        for t in self.threads {
            let _ = t.join();
        }
    }

    /// Block until the peer's threads exit (normally: forever).
    pub fn join(self) {
        for t in self.threads {
            let _ = t.join();
        }
    }
}
