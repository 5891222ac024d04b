//! Background DNS resolution of the downstream pool's hostname.
//!
//! A literal IPv4 address in the config needs no resolution at all: it is
//! seeded into `Staging` once at startup and the background task is never
//! spawned. Otherwise a single task re-resolves on `refresh_interval` and
//! hands its answer to the main loop through an `Arc<Mutex<Staging>>` — the
//! narrowest possible surface between the one genuinely separate task this
//! daemon runs and the single-threaded core that owns everything else.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, warn};

use crate::config::Downstream;
use crate::MAX_HOSTS;

/// The resolver's latest answer, shared with the core loop.
#[derive(Debug, Default)]
pub struct Staging {
    addrs: Vec<Ipv4Addr>,
    ready: bool,
}

impl Staging {
    /// Take the latest resolved address set, if a new one has landed since
    /// the last call. Returns `None` when nothing has been published yet or
    /// the last-read set has not changed.
    pub fn take_if_ready(&mut self) -> Option<Vec<Ipv4Addr>> {
        if self.ready {
            self.ready = false;
            Some(self.addrs.clone())
        } else {
            None
        }
    }
}

/// Resolve `downstream.host` to its current `A` record set, truncated to
/// `MAX_HOSTS` entries and deduplicated, preserving the reference daemon's
/// bound on membership table size.
async fn resolve_once(host: &str, data_port: u16) -> std::io::Result<Vec<Ipv4Addr>> {
    let mut addrs: Vec<Ipv4Addr> = tokio::net::lookup_host((host, data_port))
        .await?
        .filter_map(|s| match s.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .collect();
    addrs.sort_unstable();
    addrs.dedup();
    if addrs.len() > MAX_HOSTS {
        warn!(
            resolved = addrs.len(),
            cap = MAX_HOSTS,
            "truncating oversized DNS answer"
        );
        addrs.truncate(MAX_HOSTS);
    }
    Ok(addrs)
}

/// Seed `staging` and, if `downstream.host` needs DNS resolution, spawn the
/// background refresh task. Returns the task's `JoinHandle` so the core can
/// track it, or `None` when the downstream is a literal address and no task
/// was started.
pub fn start(
    downstream: Downstream,
    refresh_interval: Duration,
    staging: Arc<Mutex<Staging>>,
) -> Option<tokio::task::JoinHandle<()>> {
    if let Some(literal) = downstream.literal_addr() {
        let mut guard = staging.lock().expect("staging mutex poisoned");
        guard.addrs = vec![literal];
        guard.ready = true;
        return None;
    }

    Some(tokio::spawn(async move {
        loop {
            let already_pending = staging.lock().expect("staging mutex poisoned").ready;
            if already_pending {
                // The reconciler hasn't consumed the last answer yet; skip
                // this cycle rather than overwrite it.
                tokio::time::sleep(refresh_interval).await;
                continue;
            }

            match resolve_once(&downstream.host, downstream.data_port).await {
                Ok(addrs) => {
                    let mut guard = staging.lock().expect("staging mutex poisoned");
                    guard.addrs = addrs;
                    guard.ready = true;
                }
                Err(e) => error!(host = %downstream.host, error = %e, "DNS resolution failed"),
            }
            tokio::time::sleep(refresh_interval).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_if_ready_consumes_once() {
        let mut staging = Staging {
            addrs: vec![Ipv4Addr::new(10, 0, 0, 1)],
            ready: true,
        };
        assert!(staging.take_if_ready().is_some());
        assert!(staging.take_if_ready().is_none());
    }

    #[tokio::test]
    async fn literal_address_seeds_staging_without_spawning_a_task() {
        let downstream = Downstream {
            host: "10.0.0.5".to_string(),
            data_port: 8126,
            health_port: 8127,
        };
        let staging = Arc::new(Mutex::new(Staging::default()));
        let handle = start(downstream, Duration::from_secs(60), Arc::clone(&staging));
        assert!(handle.is_none());

        let resolved = staging.lock().unwrap().take_if_ready();
        assert_eq!(resolved, Some(vec![Ipv4Addr::new(10, 0, 0, 5)]));
    }

    #[tokio::test]
    async fn resolve_once_resolves_localhost() {
        let addrs = resolve_once("localhost", 8126).await.expect("should resolve");
        assert!(addrs.contains(&Ipv4Addr::LOCALHOST));
    }

    #[tokio::test(start_paused = true)]
    async fn resolver_skips_a_cycle_while_prior_answer_is_unconsumed() {
        let downstream = Downstream {
            host: "localhost".to_string(),
            data_port: 8126,
            health_port: 8127,
        };
        let sentinel = vec![Ipv4Addr::new(192, 0, 2, 1)];
        let staging = Arc::new(Mutex::new(Staging {
            addrs: sentinel.clone(),
            ready: true,
        }));
        let refresh_interval = Duration::from_secs(5);
        let handle = start(downstream, refresh_interval, Arc::clone(&staging));
        assert!(handle.is_some());

        // The published answer has not been consumed; a tick landing here
        // must not overwrite it with a fresh resolution.
        tokio::time::advance(refresh_interval * 2).await;
        tokio::task::yield_now().await;
        {
            let guard = staging.lock().unwrap();
            assert_eq!(guard.addrs, sentinel);
            assert!(guard.ready);
        }

        // Consuming the answer unblocks the next cycle's resolution.
        staging.lock().unwrap().take_if_ready();
        tokio::time::advance(refresh_interval * 2).await;
        tokio::task::yield_now().await;
        {
            let guard = staging.lock().unwrap();
            assert!(guard.ready, "a fresh resolution should have landed");
            assert!(guard.addrs.contains(&Ipv4Addr::LOCALHOST));
        }

        handle.unwrap().abort();
    }
}
