//! This module contains the routing control messages.
//!
//! The protocol is a reactive distance-vector scheme in the AODV family,
//! adapted for element-addressed mesh nodes: discovery requests flood with an
//! expanding TTL, replies travel back along the reverse path, intermediate
//! nodes holding a fresh route may answer with a wait notice while they
//! shortcut the request, and broken links propagate as coalesced error
//! reports.
//!
//! Each PDU encodes little-endian and byte-packed. Framing, encryption and
//! the transport MIC are the host's business; the types here only cover the
//! control payload.

use bytes::{Buf, BufMut};

pub use self::{
    rerr::Rerr, rerr::RerrDestination, rrep::Rrep, rrep::RREP_SDU_MAX, rreq::Rreq,
    rreq::RREQ_SDU_MAX, rwait::Rwait,
};

mod rerr;
mod rrep;
mod rreq;
mod rwait;

/// Transport control opcode of a route request.
const CTL_OP_RREQ: u8 = 0x0b;
/// Transport control opcode of a route reply.
const CTL_OP_RREP: u8 = 0x0c;
/// Transport control opcode of a route wait notice.
const CTL_OP_RWAIT: u8 = 0x0d;
/// Transport control opcode of a route error report.
const CTL_OP_RERR: u8 = 0x0e;

/// Transport control opcodes understood by the routing engine. The values
/// continue the transport-control numbering of the host stack after the
/// heartbeat opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CtlOp {
    /// Route request, flooded or directed.
    Rreq = CTL_OP_RREQ,
    /// Route reply, directed back along the reverse path.
    Rrep = CTL_OP_RREP,
    /// Route wait notice from an intermediate node working on a request.
    Rwait = CTL_OP_RWAIT,
    /// Route error report carrying unreachable destinations.
    Rerr = CTL_OP_RERR,
}

impl TryFrom<u8> for CtlOp {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            CTL_OP_RREQ => Ok(CtlOp::Rreq),
            CTL_OP_RREP => Ok(CtlOp::Rrep),
            CTL_OP_RWAIT => Ok(CtlOp::Rwait),
            CTL_OP_RERR => Ok(CtlOp::Rerr),
            other => Err(other),
        }
    }
}

/// Read a 24 bit little-endian unsigned integer.
///
/// # Panics
///
/// Panics if the buffer holds less than 3 bytes.
fn get_u24_le(src: &mut impl Buf) -> u32 {
    let mut raw = [0; 3];
    src.copy_to_slice(&mut raw);
    raw[0] as u32 | (raw[1] as u32) << 8 | (raw[2] as u32) << 16
}

/// Write the low 24 bits of `value` as little-endian.
fn put_u24_le(dst: &mut impl BufMut, value: u32) {
    dst.put_slice(&value.to_le_bytes()[..3]);
}
