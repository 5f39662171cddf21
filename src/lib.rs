//! Reactive on-demand routing for short-range broadcast mesh networks.
//!
//! This crate implements the node-local routing engine of an ad-hoc mesh of
//! element-addressed devices: flooded route discovery with an expanding
//! ring, directed replies along recorded reverse paths, intermediate-node
//! shortcuts, signal-strength weighted path selection, neighbour liveness
//! through periodic hellos, and coalesced route error propagation.
//!
//! The engine is deliberately narrow: framing, encryption, element
//! enumeration and the actual radio all stay on the host side of the
//! [`HostStack`] boundary. The host hands received control messages to
//! [`Router::on_ctl_receive`] and heartbeats to [`Router::on_hello`], and
//! calls [`Router::route_send_request`] when it holds data for a
//! destination without a route.

use std::time::Duration;

pub use address::{ElementRange, NetIndex, UnicastAddr};
pub use aodv::CtlOp;
pub use error::RoutingError;
pub use host::{CtlRx, CtlTx, HostStack, SendError};
pub use metric::Rssi;
pub use router::Router;
pub use routing_table::{RouteEntry, RouteKey, RouteState};
pub use sequence_number::SeqNo;

pub mod address;
pub mod aodv;
mod discovery;
mod error;
pub mod host;
pub mod metric;
mod neighbour;
mod rerr_collector;
pub mod router;
pub mod routing_table;
pub mod sequence_number;
mod timer;

/// Amount of route entries the table holds, across both stores.
pub const ROUTE_TABLE_CAPACITY: usize = 20;
/// Amount of pending discovery notifications the reply event queue holds.
pub const REPLY_EVENT_CAPACITY: usize = 20;
/// Amount of per-next-hop route error records collected between flushes.
pub const RERR_RECORD_CAPACITY: usize = 20;
/// Amount of neighbours tracked for liveness.
pub const NEIGHBOUR_CAPACITY: usize = 20;
/// Lifetime of a route entry, restarted on refresh.
pub const ROUTE_LIFETIME: Duration = Duration::from_secs(120);
/// The reply wait window: how long a destination collects competing route
/// requests before answering the best one.
pub const REPLY_WAIT: Duration = Duration::from_secs(1);
/// Time between TTL steps of the ring search.
pub const RING_INTERVAL: Duration = Duration::from_secs(10);
/// TTL at which the ring search gives up.
pub const RING_MAX_TTL: u8 = 10;
/// How long a neighbour may stay silent before it is considered lost.
pub const HELLO_LIFETIME: Duration = Duration::from_secs(20);
/// How long an allocation from a saturated pool may wait for a slot.
pub const ALLOC_TIMEOUT: Duration = Duration::from_millis(100);

/// Tuning knobs of a [`Router`]. The defaults are the protocol's nominal
/// values; deployments with very different radio duty cycles shrink or
/// stretch the timing fields.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Amount of route entries the table holds, across both stores.
    pub route_capacity: usize,
    /// Amount of pending discovery notifications the reply event queue
    /// holds.
    pub reply_event_capacity: usize,
    /// Amount of per-next-hop route error records collected between
    /// flushes.
    pub rerr_capacity: usize,
    /// Amount of neighbours tracked for liveness.
    pub neighbour_capacity: usize,
    /// Lifetime of a route entry, restarted on refresh.
    pub route_lifetime: Duration,
    /// The reply wait window of a destination.
    pub reply_wait: Duration,
    /// Time between TTL steps of the ring search.
    pub ring_interval: Duration,
    /// TTL at which the ring search gives up.
    pub ring_max_ttl: u8,
    /// How long a neighbour may stay silent before it is considered lost.
    pub hello_lifetime: Duration,
    /// How long an allocation from a saturated pool may wait for a slot.
    pub alloc_timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            route_capacity: ROUTE_TABLE_CAPACITY,
            reply_event_capacity: REPLY_EVENT_CAPACITY,
            rerr_capacity: RERR_RECORD_CAPACITY,
            neighbour_capacity: NEIGHBOUR_CAPACITY,
            route_lifetime: ROUTE_LIFETIME,
            reply_wait: REPLY_WAIT,
            ring_interval: RING_INTERVAL,
            ring_max_ttl: RING_MAX_TTL,
            hello_lifetime: HELLO_LIFETIME,
            alloc_timeout: ALLOC_TIMEOUT,
        }
    }
}
