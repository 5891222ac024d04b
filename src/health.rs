//! TCP health probing of downstream pool members.
//!
//! The reference daemon drives an explicit `Idle -> Connecting -> Sending ->
//! Reading -> Alive/Down` state machine over raw non-blocking sockets with
//! `ev_io` watchers, forcibly closing and marking a host down if a watcher is
//! still armed at the next tick. A single `tokio::time::timeout` wrapped
//! around one straight-line async function collapses that state machine
//! without changing its observable behavior: on timeout the in-flight
//! `TcpStream` future is dropped, and `Drop` closes the socket, which is the
//! same "every exit path closes the fd" property the reference code tracks
//! by hand.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::membership::Membership;
use crate::{HEALTH_CHECK_REQUEST, HEALTH_CHECK_RESPONSE_BUF, HEALTH_CHECK_UP_RESPONSE};

/// Probe a single host's health port: connect, send the health check
/// request, and check whether the response starts with the expected
/// up-marker.
async fn probe_host(addr: Ipv4Addr, port: u16) -> bool {
    let target = SocketAddr::from((addr, port));
    let mut stream = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(host = %addr, error = %e, "health probe connect failed");
            return false;
        }
    };

    if let Err(e) = stream.write_all(HEALTH_CHECK_REQUEST).await {
        debug!(host = %addr, error = %e, "health probe write failed");
        return false;
    }

    let mut buf = [0u8; HEALTH_CHECK_RESPONSE_BUF];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            debug!(host = %addr, error = %e, "health probe read failed");
            return false;
        }
    };

    buf[..n].starts_with(HEALTH_CHECK_UP_RESPONSE)
}

/// Probe every admitted host once, applying `timeout` to each connection
/// so a single unresponsive host can never stall the tick. Updates
/// `membership` in place and wakes `sender_notify` whenever a host flips
/// from down to alive, so a buffer stalled on "no live host" gets a chance
/// to drain immediately rather than waiting for the next flush.
pub async fn run_probe_tick(
    membership: &mut Membership,
    health_port: u16,
    timeout: Duration,
    sender_notify: &Arc<Notify>,
) {
    let mut tasks = JoinSet::new();
    for addr in membership.iter_addrs() {
        tasks.spawn(async move {
            let alive = tokio::time::timeout(timeout, probe_host(addr, health_port))
                .await
                .unwrap_or(false);
            (addr, alive)
        });
    }

    let mut woke_sender = false;
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok((addr, alive)) => {
                if membership.mark_alive(addr, alive) {
                    woke_sender = true;
                }
            }
            Err(e) => warn!(error = %e, "health probe task panicked"),
        }
    }

    if woke_sender {
        sender_notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn probe_reports_alive_on_matching_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(HEALTH_CHECK_UP_RESPONSE).await;
        });

        let alive = probe_host(Ipv4Addr::LOCALHOST, port).await;
        assert!(alive);
    }

    #[tokio::test]
    async fn probe_reports_down_on_connection_refused() {
        // Port 0 never accepts connections once dropped; pick an address
        // with nothing listening by binding and immediately dropping.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let alive = probe_host(Ipv4Addr::LOCALHOST, port).await;
        assert!(!alive);
    }

    #[tokio::test]
    async fn run_probe_tick_wakes_sender_on_down_to_alive_transition() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 16];
                let _ = sock.read(&mut buf).await;
                let _ = sock.write_all(HEALTH_CHECK_UP_RESPONSE).await;
            }
        });

        let mut membership = Membership::new();
        membership.reconcile(&[Ipv4Addr::LOCALHOST]);
        let notify = Arc::new(Notify::new());

        run_probe_tick(&mut membership, port, Duration::from_secs(1), &notify).await;
        assert_eq!(membership.select_live_host(), Some(Ipv4Addr::LOCALHOST));

        // notify_one should have been called; a waiter created now and
        // immediately notified again should not block.
        notify.notify_one();
        notify.notified().await;
    }
}
