//! The in-memory aggregation engine: routes parsed samples into
//! [`Slot`](crate::slot::Slot)s, folds counters, and seals the current
//! window into the flush ring when it times out or runs out of room.
//!
//! ## Metrics
//!
//! `lines_rejected`: Malformed lines dropped at parse time
//! `segments_rejected`: Malformed or type-conflicting segments dropped
//! `windows_dropped`: Flush windows lost because the ring didn't drain in time
//! `flushes`: Windows successfully sealed into the ring

use std::sync::Arc;

use metrics::counter;
use tokio::sync::Notify;
use tracing::{error, trace};

use crate::numeric::format_g;
use crate::ring::FlushRing;
use crate::slot::{MetricType, Slot};
use crate::{DATAGRAM_MAX, MAX_COUNTER_LEN, SLOT_TABLE_CAPACITY};

const COUNTER_PRECISION: usize = 15;

/// Bounded accumulator table for the flush window currently being
/// assembled.
#[derive(Debug, Default)]
struct SlotTable {
    slots: Vec<Slot>,
    active_bytes: usize,
}

impl SlotTable {
    fn find(&self, name: &[u8]) -> Option<usize> {
        self.slots.iter().position(|s| s.name() == name)
    }

    fn would_overflow(&self, additional: usize) -> bool {
        self.active_bytes + additional > DATAGRAM_MAX
    }

    fn allocate(&mut self, name: &[u8]) -> usize {
        debug_assert!(
            self.slots.len() < SLOT_TABLE_CAPACITY,
            "slot table capacity exceeded; caller should have flushed first"
        );
        self.active_bytes += name.len();
        self.slots.push(Slot::new(name));
        self.slots.len() - 1
    }

    fn apply_delta(&mut self, delta: isize) {
        self.active_bytes = (self.active_bytes as isize + delta) as usize;
    }

    fn reset(&mut self) {
        self.slots.clear();
        self.active_bytes = 0;
    }
}

/// Routes parsed statsd lines into slots and seals flush windows into the
/// ring.
#[derive(Debug)]
pub struct Aggregator {
    table: SlotTable,
    ring: FlushRing,
    sender_notify: Arc<Notify>,
    labels: Vec<(String, String)>,
}

impl Aggregator {
    #[must_use]
    pub fn new(sender_notify: Arc<Notify>) -> Self {
        Aggregator {
            table: SlotTable::default(),
            ring: FlushRing::default(),
            sender_notify,
            labels: vec![("component".to_string(), "aggregator".to_string())],
        }
    }

    /// Current number of bytes committed to the in-progress window.
    #[must_use]
    pub fn active_bytes(&self) -> usize {
        self.table.active_bytes
    }

    /// Shared access to the flush ring, for the sender.
    pub fn ring(&mut self) -> &mut FlushRing {
        &mut self.ring
    }

    /// Parse one inbound datagram and fold its samples into the current
    /// window. Malformed lines are logged and skipped; this never fails the
    /// caller.
    pub fn ingest_datagram(&mut self, datagram: &[u8]) {
        // The reference parser always operates on newline-terminated lines;
        // a final partial line gets a synthetic terminator appended.
        let mut owned;
        let data: &[u8] = if datagram.last() == Some(&b'\n') {
            datagram
        } else {
            owned = Vec::with_capacity(datagram.len() + 1);
            owned.extend_from_slice(datagram);
            owned.push(b'\n');
            &owned
        };

        for line in data.split_inclusive(|&b| b == b'\n') {
            if line.len() > 6 && line.len() < DATAGRAM_MAX - MAX_COUNTER_LEN {
                self.ingest_line(line);
            } else {
                counter!("lines_rejected", &self.labels).increment(1);
                error!(
                    length = line.len(),
                    "invalid length of metric {:?}", String::from_utf8_lossy(line)
                );
            }
        }
    }

    fn ingest_line(&mut self, line: &[u8]) {
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            counter!("lines_rejected", &self.labels).increment(1);
            error!("invalid metric, no ':' found: {:?}", String::from_utf8_lossy(line));
            return;
        };
        let name = &line[..=colon];
        let mut slot_idx = self.find_slot(name);
        let mut remaining = &line[colon + 1..];

        loop {
            let found = remaining.iter().position(|&b| b == b':');
            let data_length = found.map_or(remaining.len(), |pos| pos + 1);
            let segment = &remaining[..data_length];
            remaining = &remaining[data_length..];

            self.ingest_segment(&mut slot_idx, name, segment);

            if found.is_none() {
                break;
            }
        }
    }

    fn ingest_segment(&mut self, slot_idx: &mut usize, name: &[u8], segment: &[u8]) {
        let Some(type_pos) = segment.iter().position(|&b| b == b'|') else {
            counter!("segments_rejected", &self.labels).increment(1);
            error!("invalid metric data {:?}", String::from_utf8_lossy(segment));
            return;
        };
        let metric_type = if segment.get(type_pos + 1) == Some(&b'c') {
            MetricType::Counter
        } else {
            MetricType::Other
        };

        {
            let slot = &self.table.slots[*slot_idx];
            if slot.metric_type() != MetricType::Unknown && slot.metric_type() != metric_type {
                counter!("segments_rejected", &self.labels).increment(1);
                error!(
                    "got improper metric type for {:?}",
                    String::from_utf8_lossy(slot.name())
                );
                return;
            }
        }

        let cost = if metric_type == MetricType::Counter {
            MAX_COUNTER_LEN
        } else {
            segment.len()
        };
        if self.table.would_overflow(cost) {
            self.schedule_flush();
            *slot_idx = self.table.allocate(name);
        }
        self.table.slots[*slot_idx].lock_type(metric_type);

        match metric_type {
            MetricType::Counter => self.ingest_counter_segment(*slot_idx, type_pos, segment),
            MetricType::Other => {
                self.table.slots[*slot_idx].append_other(segment);
                self.table.apply_delta(segment.len() as isize);
            }
            MetricType::Unknown => unreachable!("lock_type always resolves Unknown"),
        }
    }

    fn ingest_counter_segment(&mut self, slot_idx: usize, type_pos: usize, segment: &[u8]) {
        let rate = parse_rate(segment, type_pos);
        let Ok(raw_value) = std::str::from_utf8(&segment[..type_pos]).unwrap_or("").parse::<f64>()
        else {
            counter!("segments_rejected", &self.labels).increment(1);
            error!(
                "invalid value in counter data {:?}",
                String::from_utf8_lossy(&segment[..type_pos])
            );
            return;
        };

        let slot = &self.table.slots[slot_idx];
        let candidate = slot.counter_accum() + raw_value / rate;
        if !candidate.is_finite() {
            counter!("segments_rejected", &self.labels).increment(1);
            error!(
                value = candidate,
                "counter value is not finite, dropping sample"
            );
            return;
        }
        let rendered = format!("{}|c\n", format_g(candidate, COUNTER_PRECISION));
        if rendered.len() > MAX_COUNTER_LEN {
            counter!("segments_rejected", &self.labels).increment(1);
            error!(
                value = candidate,
                "counter rendering exceeds {MAX_COUNTER_LEN} bytes, dropping sample"
            );
            return;
        }

        let delta = self.table.slots[slot_idx].set_counter(candidate, &rendered);
        self.table.apply_delta(delta);
    }

    fn find_slot(&mut self, name: &[u8]) -> usize {
        if let Some(idx) = self.table.find(name) {
            return idx;
        }
        if self.table.would_overflow(name.len()) {
            self.schedule_flush();
        }
        self.table.allocate(name)
    }

    /// Seal the current window into the flush ring if it holds anything,
    /// used by the periodic flush timer.
    pub fn flush_if_nonempty(&mut self) {
        if self.table.active_bytes > 0 {
            self.schedule_flush();
        }
    }

    /// Close the current window: assemble every non-empty slot's payload
    /// into the ring's active buffer, then reset the slot table for the
    /// next window.
    fn schedule_flush(&mut self) {
        if self.ring.next_active_is_occupied() {
            counter!("windows_dropped", &self.labels).increment(1);
            error!("previous flush is not completed, loosing data.");
            self.table.reset();
            return;
        }

        let buf = self.ring.active_buffer();
        buf.clear();
        for slot in &mut self.table.slots {
            if slot.is_empty() {
                continue;
            }
            buf.extend_from_slice(slot.sealed_payload());
        }
        trace!(bytes = buf.len(), "flushing buffer");

        self.ring.advance_active();
        self.table.reset();
        counter!("flushes", &self.labels).increment(1);

        // Unlike the reference implementation, which only re-arms the
        // sender's write watcher on an empty-to-nonempty ring transition,
        // every sealed window wakes the sender. That transition-only rule
        // can leave a buffer stuck behind a down host indefinitely once a
        // second flush lands behind it; see DESIGN.md.
        self.sender_notify.notify_one();
    }
}

/// Parse the optional `@rate` suffix on a counter segment. Any parse
/// failure — missing `@`, garbage float text, trailing bytes — defaults the
/// rate to `1.0` rather than rejecting the sample.
fn parse_rate(segment: &[u8], type_pos: usize) -> f64 {
    let after_type = &segment[type_pos + 1..];
    let Some(rel_pos) = after_type.iter().position(|&b| b == b'|') else {
        return 1.0;
    };
    if after_type.get(rel_pos + 1) != Some(&b'@') {
        return 1.0;
    }
    // The rate text must span exactly to the byte before the segment's
    // trailing separator; anything else is treated as an invalid rate.
    let rate_start = rel_pos + 2;
    let Some(rate_text) = after_type.get(rate_start..after_type.len().saturating_sub(1)) else {
        return 1.0;
    };
    std::str::from_utf8(rate_text)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|r| r.is_finite() && *r != 0.0)
        .unwrap_or(1.0)
}
