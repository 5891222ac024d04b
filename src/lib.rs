//! `statsd-relay` is a local UDP aggregator for the statsd line protocol.
//!
//! It listens for statsd datagrams on a well-known port, coalesces samples
//! sharing a metric name within a flush window, and forwards the aggregated
//! payloads on to one of a dynamically-discovered pool of downstream
//! collectors. See [`core::Core`] for the wiring between subsystems.

pub mod aggregator;
pub mod config;
pub mod health;
pub mod membership;
pub mod numeric;
pub mod resolver;
pub mod ring;
pub mod signals;
pub mod slot;

mod core;

pub use crate::core::{Core, Error};

/// Maximum size, in bytes, of a single inbound datagram this relay will read.
pub const RECV_MAX: usize = 4095;

/// Maximum size, in bytes, of a single outbound (egress) datagram.
///
/// Chosen to sit comfortably below typical MTU so aggregated payloads never
/// require IP fragmentation.
pub const DATAGRAM_MAX: usize = 1450;

/// Number of fixed-size buffers held by the flush ring.
pub const RING_DEPTH: usize = 16;

/// Upper bound on the rendered length of `"<value>|c\n"` for a counter.
///
/// `%.15g` never needs more digits than this for values we're willing to
/// accept; see [`numeric::format_g`].
pub const MAX_COUNTER_LEN: usize = 18;

/// Capacity of the slot table: the worst case is a flush window packed with
/// minimal two-byte names (`aa:1|c\n` is 7 bytes), so this is the most slots
/// that could possibly be live at once without tripping the datagram budget.
pub const SLOT_TABLE_CAPACITY: usize = DATAGRAM_MAX / 7;

/// Maximum number of downstream addresses tracked from a single DNS
/// resolution.
pub const MAX_HOSTS: usize = 32;

/// Egress socket is rotated after this many successful sends, guarding
/// against long-lived kernel socket state accumulating.
pub const MAX_PACKETS_PER_SOCKET: u64 = 1000;

/// Request body sent to a downstream's health port.
pub const HEALTH_CHECK_REQUEST: &[u8] = b"health";

/// Expected response prefix signalling a downstream is alive.
pub const HEALTH_CHECK_UP_RESPONSE: &[u8] = b"health: up\n";

/// Size of the read buffer used while probing a downstream's health port.
pub const HEALTH_CHECK_RESPONSE_BUF: usize = 32;
