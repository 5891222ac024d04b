//! Wires ingest, aggregation, membership, health probing, resolution, and
//! egress into a single cooperative event loop, in the manner of this
//! crate's reference stack's generator and blackhole tasks: one
//! `tokio::select!` over a handful of branches, driven by a current-thread
//! runtime rather than work-stealing threads, because nothing here
//! benefits from true parallelism and a single loop keeps every data
//! structure free of synchronization except at the one real task boundary
//! (the resolver).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::membership::Membership;
use crate::resolver::{self, Staging};
use crate::signals::Watcher;
use crate::{DATAGRAM_MAX, MAX_PACKETS_PER_SOCKET, RECV_MAX};

/// Errors that can prevent the daemon from starting.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to bind ingest socket on port {port}: {source}")]
    BindIngest {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind egress socket: {source}")]
    BindEgress {
        #[source]
        source: std::io::Error,
    },
}

/// The assembled daemon: every subsystem plus the sockets it drives.
pub struct Core {
    config: Config,
    ingest: UdpSocket,
    egress: UdpSocket,
    egress_sent: u64,
    aggregator: Aggregator,
    membership: Membership,
    staging: Arc<Mutex<Staging>>,
    sender_notify: Arc<Notify>,
}

impl Core {
    /// Bind sockets and assemble every subsystem. Does not start the
    /// background resolver task or the event loop; call [`Core::run`] for
    /// that.
    ///
    /// # Errors
    ///
    /// Returns an error if either the ingest or egress UDP socket fails to
    /// bind.
    pub async fn new(config: Config) -> Result<Self, Error> {
        let ingest = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], config.data_port)))
            .await
            .map_err(|source| Error::BindIngest {
                port: config.data_port,
                source,
            })?;
        let egress = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
            .await
            .map_err(|source| Error::BindEgress { source })?;

        let sender_notify = Arc::new(Notify::new());
        let aggregator = Aggregator::new(Arc::clone(&sender_notify));

        Ok(Core {
            config,
            ingest,
            egress,
            egress_sent: 0,
            aggregator,
            membership: Membership::new(),
            staging: Arc::new(Mutex::new(Staging::default())),
            sender_notify,
        })
    }

    /// Run until `shutdown` fires. Spawns the background DNS resolver (if
    /// needed) and drives ingest, flush timing, health probing, membership
    /// reconciliation, and egress from one loop.
    pub async fn run(mut self, mut shutdown: Watcher) {
        let resolver_handle = resolver::start(
            self.config.downstream.clone(),
            self.config.dns_refresh_interval,
            Arc::clone(&self.staging),
        );

        let mut flush_timer = tokio::time::interval(self.config.flush_interval);
        let mut health_timer = tokio::time::interval(self.config.health_check_interval);
        let mut recv_buf = vec![0u8; RECV_MAX];

        loop {
            tokio::select! {
                biased;

                () = shutdown.recv() => {
                    info!("shutdown signal received, draining and exiting");
                    break;
                }

                result = self.ingest.recv_from(&mut recv_buf) => {
                    match result {
                        Ok((n, _src)) => self.aggregator.ingest_datagram(&recv_buf[..n]),
                        Err(e) => warn!(error = %e, "ingest socket read failed"),
                    }
                }

                _ = flush_timer.tick() => {
                    self.aggregator.flush_if_nonempty();
                }

                _ = health_timer.tick() => {
                    if let Some(addrs) = self.staging.lock().expect("staging mutex poisoned").take_if_ready() {
                        self.membership.reconcile(&addrs);
                    }
                    crate::health::run_probe_tick(
                        &mut self.membership,
                        self.config.downstream.health_port,
                        self.config.health_check_interval,
                        &self.sender_notify,
                    ).await;
                }

                () = self.sender_notify.notified() => {
                    self.drain_ring().await;
                }
            }
        }

        if let Some(handle) = resolver_handle {
            handle.abort();
        }
    }

    /// Send every sealed buffer currently sitting in the flush ring to the
    /// next live downstream host. If no host is alive, the buffers stay
    /// queued and another attempt happens whenever `sender_notify` fires
    /// again (the next flush, or the next down-to-alive health transition).
    async fn drain_ring(&mut self) {
        loop {
            let Some(buf) = self.aggregator.ring().peek_flush() else {
                return;
            };
            debug_assert!(buf.len() <= DATAGRAM_MAX);

            let Some(addr) = self.membership.select_live_host() else {
                error!("no live downstream host, leaving flush buffer queued");
                return;
            };
            let target = SocketAddr::from((addr, self.config.downstream.data_port));

            match self.egress.send_to(buf, target).await {
                Ok(_) => {
                    self.aggregator.ring().advance_flush();
                    self.egress_sent += 1;
                    if self.egress_sent > MAX_PACKETS_PER_SOCKET {
                        if let Err(e) = self.rotate_egress_socket().await {
                            error!(error = %e, "failed to rotate egress socket");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, host = %addr, "egress send failed, leaving buffer queued");
                    return;
                }
            }
        }
    }

    async fn rotate_egress_socket(&mut self) -> std::io::Result<()> {
        let fresh = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
        self.egress = fresh;
        self.egress_sent = 0;
        Ok(())
    }
}
