//! A fixed-count ring of outbound datagram buffers, the handoff point
//! between ingest (which fills the active buffer at flush time) and the
//! sender (which drains buffers in ring order).

use crate::{DATAGRAM_MAX, RING_DEPTH};

/// The flush ring: `RING_DEPTH` buffers of fixed capacity `DATAGRAM_MAX`,
/// with two cursors — `active_idx` is the next buffer ingest will seal into,
/// `flush_idx` is the next buffer the sender will drain.
#[derive(Debug)]
pub struct FlushRing {
    buffers: [Vec<u8>; RING_DEPTH],
    active_idx: usize,
    flush_idx: usize,
}

impl Default for FlushRing {
    fn default() -> Self {
        FlushRing {
            buffers: std::array::from_fn(|_| Vec::with_capacity(DATAGRAM_MAX)),
            active_idx: 0,
            flush_idx: 0,
        }
    }
}

impl FlushRing {
    /// `true` when there is nothing queued to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_idx == self.flush_idx && self.buffers[self.active_idx].is_empty()
    }

    /// The buffer ingest is currently sealing data into.
    pub(crate) fn active_buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffers[self.active_idx]
    }

    #[must_use]
    pub(crate) fn active_idx(&self) -> usize {
        self.active_idx
    }

    #[must_use]
    pub(crate) fn flush_idx(&self) -> usize {
        self.flush_idx
    }

    /// Whether the slot that would become the new active buffer is still
    /// occupied by an undrained flush — the precondition failure described
    /// in the schedule-flush algorithm.
    #[must_use]
    pub(crate) fn next_active_is_occupied(&self) -> bool {
        let next = (self.active_idx + 1) % RING_DEPTH;
        !self.buffers[next].is_empty()
    }

    /// Advance `active_idx`, returning whether the ring had been empty
    /// beforehand (in which case the sender needs to be woken).
    pub(crate) fn advance_active(&mut self) -> bool {
        let was_empty = self.active_idx == self.flush_idx;
        self.active_idx = (self.active_idx + 1) % RING_DEPTH;
        was_empty
    }

    /// The buffer ready to be sent next, if any.
    #[must_use]
    pub fn peek_flush(&self) -> Option<&[u8]> {
        if self.is_empty() {
            None
        } else {
            Some(&self.buffers[self.flush_idx])
        }
    }

    /// Mark the current flush buffer as sent and advance `flush_idx`.
    pub fn advance_flush(&mut self) {
        self.buffers[self.flush_idx].clear();
        self.flush_idx = (self.flush_idx + 1) % RING_DEPTH;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let ring = FlushRing::default();
        assert!(ring.is_empty());
        assert_eq!(ring.peek_flush(), None);
    }

    #[test]
    fn fill_drain_cycle() {
        let mut ring = FlushRing::default();
        ring.active_buffer().extend_from_slice(b"a:1|c\n");
        let was_empty = ring.advance_active();
        assert!(was_empty);
        assert!(!ring.is_empty());

        assert_eq!(ring.peek_flush(), Some(&b"a:1|c\n"[..]));
        ring.advance_flush();
        assert!(ring.is_empty());
    }

    #[test]
    fn wraps_at_ring_depth() {
        let mut ring = FlushRing::default();
        for i in 0..RING_DEPTH {
            assert!(!ring.next_active_is_occupied(), "iteration {i}");
            ring.active_buffer().push(b'x');
            ring.advance_active();
        }
        // The ring is now completely full; the next slot is occupied.
        assert!(ring.next_active_is_occupied());
    }

    proptest::proptest! {
        // Invariant 3 (§8): every buffer handed to the sender stays within
        // DATAGRAM_MAX, across an arbitrary interleaving of seals and drains.
        #[test]
        fn buffer_length_never_exceeds_datagram_max(
            fill_lens in proptest::collection::vec(0usize..DATAGRAM_MAX, 1..40),
        ) {
            let mut ring = FlushRing::default();
            for len in fill_lens {
                // Draining after every seal keeps the ring from saturating,
                // exercising the common ingest/flush/drain cadence.
                ring.active_buffer().resize(len, b'x');
                ring.advance_active();
                if let Some(buf) = ring.peek_flush() {
                    proptest::prop_assert!(buf.len() <= DATAGRAM_MAX);
                }
                ring.advance_flush();
            }
        }
    }
}
