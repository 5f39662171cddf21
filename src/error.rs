//! Routing error types.

use thiserror::Error;

use crate::host::SendError;

/// Errors surfaced by the routing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// A route request named one of our own elements as its originator. The
    /// request is dropped without touching any state.
    #[error("route request originates from a local element")]
    LocalLoopback,

    /// A route request arrived after the destination already installed a
    /// valid route for the same pair, i.e. the reply window has closed.
    #[error("route request received after the reply window closed")]
    LateRreq,

    /// The ring search exhausted its maximum TTL without hearing a reply.
    /// The caller may retry later.
    #[error("ring search exhausted the maximum TTL without a reply")]
    NoReply,

    /// A fixed capacity pool is saturated. The triggering message is
    /// dropped; the protocol recovers through retransmission.
    #[error("fixed capacity pool is saturated")]
    ResourceExhausted,

    /// A control payload was shorter than its PDU requires.
    #[error("control payload too short for its opcode")]
    DecodeShort,

    /// The lower transport layer refused a control message. Propagated
    /// unchanged, retry policy is the caller's.
    #[error(transparent)]
    Send(#[from] SendError),
}
