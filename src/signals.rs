//! A small broadcast-once shutdown signal, in the spirit of the generator
//! and blackhole `shutdown: lading_signal::Watcher` fields this crate's
//! reference stack threads through every long-running task.
//!
//! `SIGINT` triggers [`Shutdown::fire`]; every clone of the matching
//! [`Watcher`] resolves its `recv` future exactly once, after which further
//! `recv` calls resolve immediately. `SIGHUP` is logged and otherwise
//! ignored, per the external interface contract.

use tokio::sync::watch;
use tracing::info;

/// The sending half of the shutdown signal. Owned by `main`.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// A cloneable receiver for the shutdown signal.
#[derive(Debug, Clone)]
pub struct Watcher {
    rx: watch::Receiver<bool>,
}

/// Construct a fresh shutdown signal pair.
#[must_use]
pub fn new() -> (Shutdown, Watcher) {
    let (tx, rx) = watch::channel(false);
    (Shutdown { tx }, Watcher { rx })
}

impl Shutdown {
    /// Fire the shutdown signal. Idempotent.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }
}

impl Watcher {
    /// Resolve once shutdown has fired. Safe to call from within
    /// `tokio::select!`; resolves immediately on every call after the first.
    pub async fn recv(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // `changed` only errors if every `Shutdown` sender has been dropped
        // without firing, which would be a bug in wiring, not a runtime
        // condition to handle gracefully.
        let _ = self.rx.changed().await;
    }
}

/// Install OS signal handlers: `SIGINT` fires `shutdown`, `SIGHUP` is logged
/// and ignored. Runs until `shutdown` fires by some other path, so it should
/// be spawned rather than awaited inline.
///
/// # Panics
///
/// Panics if the process cannot install a signal handler, which only
/// happens if the OS signal machinery itself is broken.
pub async fn watch_for_signals(shutdown: Shutdown) {
    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .expect("failed to install SIGHUP handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                info!("sighup received");
            }
            _ = sigint.recv() => {
                info!("sigint received");
                shutdown.fire();
                return;
            }
        }
    }
}
