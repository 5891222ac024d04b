//! Per-name accumulation records for the current flush window.

use crate::DATAGRAM_MAX;

/// The kind of metric accumulated in a [`Slot`].
///
/// A slot's type is locked to whichever kind its first sample carries;
/// a later sample of a different kind against the same name is a type
/// conflict (see `Aggregator::ingest_line`) and is rejected, not merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// No sample has landed in this slot yet.
    Unknown,
    /// A statsd counter (`|c`); folded by summation.
    Counter,
    /// Any other statsd type; passed through verbatim.
    Other,
}

/// A single metric name's accumulator for the window currently being
/// assembled.
///
/// `payload` always starts with the metric name (including its trailing
/// `:`); everything after `name_length` is either a rendered counter line or
/// a concatenation of pass-through segments ending in `:` (see module docs
/// on [`crate::aggregator`] for the exact invariants).
#[derive(Debug)]
pub struct Slot {
    payload: Vec<u8>,
    name_length: usize,
    metric_type: MetricType,
    counter_accum: f64,
}

impl Slot {
    /// Create a new, empty slot for `name` (which must include its trailing
    /// `:`).
    pub(crate) fn new(name: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(DATAGRAM_MAX);
        payload.extend_from_slice(name);
        Slot {
            payload,
            name_length: name.len(),
            metric_type: MetricType::Unknown,
            counter_accum: 0.0,
        }
    }

    /// The metric name, including its trailing `:`.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.payload[..self.name_length]
    }

    /// Length of the name prefix, including its trailing `:`.
    #[must_use]
    pub fn name_length(&self) -> usize {
        self.name_length
    }

    /// Total bytes currently held by this slot, name included.
    #[must_use]
    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }

    /// `true` if no sample has landed in this slot since it was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.len() == self.name_length
    }

    #[must_use]
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub(crate) fn lock_type(&mut self, ty: MetricType) {
        if self.metric_type == MetricType::Unknown {
            self.metric_type = ty;
        }
    }

    /// Render `value` as a counter line (`"<%.15g>|c\n"`) and replace the
    /// prior rendering, if any.
    ///
    /// Returns the signed change in `payload_length`, which the caller folds
    /// into the slot table's `active_bytes` accounting.
    pub(crate) fn set_counter(&mut self, value: f64, rendered: &str) -> isize {
        let old_len = self.payload.len();
        self.payload.truncate(self.name_length);
        self.payload.extend_from_slice(rendered.as_bytes());
        self.counter_accum = value;
        self.payload.len() as isize - old_len as isize
    }

    /// Current accumulated counter value. Only meaningful once
    /// `metric_type() == MetricType::Counter`.
    #[must_use]
    pub fn counter_accum(&self) -> f64 {
        self.counter_accum
    }

    /// Append a pass-through segment (including its trailing separator byte,
    /// which the caller normalizes to `:`).
    pub(crate) fn append_other(&mut self, segment: &[u8]) {
        debug_assert!(!segment.is_empty());
        self.payload.extend_from_slice(&segment[..segment.len() - 1]);
        self.payload.push(b':');
    }

    /// Bytes ready to be copied into the flush ring, with the final
    /// separator normalized to the datagram line terminator.
    pub(crate) fn sealed_payload(&mut self) -> &[u8] {
        if let Some(last) = self.payload.last_mut() {
            *last = b'\n';
        }
        &self.payload
    }
}
