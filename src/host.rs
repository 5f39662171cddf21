//! The boundary between the routing engine and the host stack.
//!
//! The engine neither frames nor encrypts control messages, and it does not
//! own the element composition of the node. Everything below the routing
//! layer — network transmission, subnet key material, element enumeration
//! and the session sequence counter — is reached through [`HostStack`].

use thiserror::Error;

use crate::address::{NetIndex, UnicastAddr};
use crate::aodv::CtlOp;
use crate::sequence_number::SeqNo;

/// Network-layer metadata of a received control message.
#[derive(Debug, Clone, Copy)]
pub struct CtlRx {
    /// Link-local address of the node the message was received from.
    pub source: UnicastAddr,
    /// Network-layer destination the sender addressed.
    pub destination: UnicastAddr,
    /// Subnet the message was received on.
    pub net_idx: NetIndex,
    /// Signal strength of the receiving link, in dBm.
    pub rssi: i8,
    /// TTL the message arrived with.
    pub recv_ttl: u8,
}

/// Network-layer metadata for a control message to transmit.
#[derive(Debug, Clone, Copy)]
pub struct CtlTx {
    /// Network-layer destination, either a unicast next hop or
    /// [`UnicastAddr::ALL_NODES`] for a flood.
    pub destination: UnicastAddr,
    /// Subnet to transmit on.
    pub net_idx: NetIndex,
    /// TTL to transmit with. A TTL of 0 restricts the message to the direct
    /// link.
    pub ttl: u8,
}

/// The lower transport layer refused to send a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("lower transport refused the control message")]
pub struct SendError;

/// Host-side collaborators of the routing engine.
///
/// Implementations are expected to be cheap handles; the engine clones
/// itself into background tasks and calls these methods from several of
/// them. None of the methods may block.
pub trait HostStack: Send + Sync + 'static {
    /// Encrypt, frame and radiate a control message. `payload` is the
    /// encoded PDU for `op`, without any transport framing.
    fn send_ctl(&self, tx: CtlTx, op: CtlOp, payload: &[u8]) -> Result<(), SendError>;

    /// Checks whether key material for the given subnet is available.
    /// Control messages are never produced for unknown subnets.
    fn subnet_exists(&self, net_idx: NetIndex) -> bool;

    /// The primary unicast address of the local node.
    fn primary_addr(&self) -> UnicastAddr;

    /// The amount of elements the local node exposes.
    fn elem_count(&self) -> u16;

    /// Checks if the given address belongs to one of the local node's
    /// elements.
    fn elem_find(&self, addr: UnicastAddr) -> bool;

    /// Current value of the node's session sequence counter.
    fn session_seq(&self) -> SeqNo;
}
