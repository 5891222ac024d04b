//! Tracks the downstream pool's current membership and liveness, and
//! selects which live host the sender should target next.
//!
//! Hosts are stored in a slab (`Vec<Option<Host>>`) rather than a plain
//! `Vec<Host>` so that retiring a host never shifts another host's index:
//! a freshly-retired slot becomes `None` and is reused on the next
//! admission, but existing indices (including the round-robin cursor)
//! never dangle or silently point at the wrong host.

use std::net::Ipv4Addr;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// A single downstream pool member.
#[derive(Debug, Clone)]
pub struct Host {
    pub addr: Ipv4Addr,
    pub alive: bool,
}

/// The live downstream pool: a slab of hosts, an address index, and a
/// round-robin cursor.
#[derive(Debug, Default)]
pub struct Membership {
    slots: Vec<Option<Host>>,
    index: FxHashMap<Ipv4Addr, usize>,
    cursor: Option<usize>,
}

impl Membership {
    #[must_use]
    pub fn new() -> Self {
        Membership::default()
    }

    /// Number of hosts currently admitted (live or not yet probed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Reconcile against a fresh DNS answer (or static seed): any admitted
    /// address absent from `wanted` is retired, and any address in `wanted`
    /// not already admitted is added with `alive: false` pending its first
    /// health probe.
    ///
    /// Two passes, retire-then-admit, matching the reference daemon's
    /// `update_downstreams`. Any retirement resets the round-robin cursor to
    /// `None` rather than the reference implementation's "reset to head",
    /// which can leave a cursor pointed at a host retired in the very same
    /// pass.
    pub fn reconcile(&mut self, wanted: &[Ipv4Addr]) {
        let wanted_set: std::collections::HashSet<_> = wanted.iter().copied().collect();

        let mut retired_any = false;
        for (addr, &idx) in self.index.clone().iter() {
            if !wanted_set.contains(addr) {
                info!(host = %addr, "retiring downstream host");
                self.slots[idx] = None;
                self.index.remove(addr);
                retired_any = true;
            }
        }

        for &addr in wanted {
            if self.index.contains_key(&addr) {
                continue;
            }
            info!(host = %addr, "admitting downstream host");
            let host = Host { addr, alive: false };
            let idx = if let Some(free) = self.slots.iter().position(Option::is_none) {
                self.slots[free] = Some(host);
                free
            } else {
                self.slots.push(Some(host));
                self.slots.len() - 1
            };
            self.index.insert(addr, idx);
        }

        if retired_any {
            self.cursor = None;
        }
    }

    /// Record the outcome of a health probe against `addr`. Returns `true`
    /// if this flipped the host from down to alive (the sender should be
    /// woken in that case, since a stalled flush may now be deliverable).
    pub fn mark_alive(&mut self, addr: Ipv4Addr, alive: bool) -> bool {
        let Some(&idx) = self.index.get(&addr) else {
            return false;
        };
        let Some(host) = self.slots[idx].as_mut() else {
            return false;
        };
        let became_alive = !host.alive && alive;
        if host.alive != alive {
            debug!(host = %addr, alive, "downstream liveness changed");
        }
        host.alive = alive;
        became_alive
    }

    /// Addresses of every admitted host, for the health prober to fan out
    /// over.
    pub fn iter_addrs(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.slots.iter().flatten().map(|h| h.addr)
    }

    /// Advance the round-robin cursor to the next live host and return its
    /// address, or `None` if no host is currently alive.
    ///
    /// Bounded to at most `slots.len()` probes per call, so a caller cannot
    /// spin forever chasing a cursor through an all-dead table.
    pub fn select_live_host(&mut self) -> Option<Ipv4Addr> {
        if self.slots.is_empty() {
            return None;
        }
        let start = self.cursor.map_or(0, |c| (c + 1) % self.slots.len());
        let mut idx = start;
        for _ in 0..self.slots.len() {
            if let Some(host) = &self.slots[idx] {
                if host.alive {
                    self.cursor = Some(idx);
                    return Some(host.addr);
                }
            }
            idx = (idx + 1) % self.slots.len();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    #[test]
    fn reconcile_admits_and_retires() {
        let mut m = Membership::new();
        m.reconcile(&[addr(1), addr(2)]);
        assert_eq!(m.len(), 2);

        m.reconcile(&[addr(2), addr(3)]);
        assert_eq!(m.len(), 2);
        let addrs: std::collections::HashSet<_> = m.iter_addrs().collect();
        assert_eq!(addrs, [addr(2), addr(3)].into_iter().collect());
    }

    #[test]
    fn e6_retire_then_admit_with_fresh_host_not_yet_alive() {
        let mut m = Membership::new();
        m.reconcile(&[addr(1)]);
        m.mark_alive(addr(1), true);

        m.reconcile(&[addr(3)]);
        assert_eq!(m.select_live_host(), None, "new host starts not-alive");

        m.mark_alive(addr(3), true);
        assert_eq!(m.select_live_host(), Some(addr(3)));
    }

    #[test]
    fn select_live_host_round_robins() {
        let mut m = Membership::new();
        m.reconcile(&[addr(1), addr(2), addr(3)]);
        m.mark_alive(addr(1), true);
        m.mark_alive(addr(2), true);
        m.mark_alive(addr(3), true);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(m.select_live_host().expect("should find a live host"));
        }
        assert_eq!(seen.len(), 3, "every host visited within one lap");
    }

    #[test]
    fn select_live_host_skips_dead_hosts() {
        let mut m = Membership::new();
        m.reconcile(&[addr(1), addr(2)]);
        m.mark_alive(addr(1), false);
        m.mark_alive(addr(2), true);

        for _ in 0..4 {
            assert_eq!(m.select_live_host(), Some(addr(2)));
        }
    }

    #[test]
    fn no_live_host_returns_none() {
        let mut m = Membership::new();
        m.reconcile(&[addr(1)]);
        assert_eq!(m.select_live_host(), None);
    }

    #[test]
    fn mark_alive_reports_down_to_alive_transition() {
        let mut m = Membership::new();
        m.reconcile(&[addr(1)]);
        assert!(!m.mark_alive(addr(1), false));
        assert!(m.mark_alive(addr(1), true));
        assert!(!m.mark_alive(addr(1), true));
    }

    #[test]
    fn retiring_a_host_resets_cursor() {
        let mut m = Membership::new();
        m.reconcile(&[addr(1), addr(2)]);
        m.mark_alive(addr(1), true);
        m.mark_alive(addr(2), true);
        let _ = m.select_live_host();

        m.reconcile(&[addr(2)]);
        // Cursor reset to None means the next call starts scanning from 0
        // rather than potentially dereferencing a retired slot's old index.
        assert_eq!(m.select_live_host(), Some(addr(2)));
    }
}
