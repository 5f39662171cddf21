//! The route error PDU.

use bytes::{Buf, BufMut};

use crate::address::UnicastAddr;
use crate::sequence_number::SeqNo;

use super::{get_u24_le, put_u24_le};

/// Wire size of one unreachable-destination record inside a route error.
const RERR_DESTINATION_WIRE_SIZE: usize = 5;

/// One unreachable destination carried in a route error report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerrDestination {
    /// Base address of the unreachable destination.
    pub address: UnicastAddr,
    /// Last sequence number known for the destination.
    pub seqno: SeqNo,
}

/// A route error report, sent unicast to an upstream neighbour when routes
/// through a broken link are torn down. One report coalesces every
/// destination which became unreachable through the same next hop;
/// destinations are unique within a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Rerr {
    destinations: Vec<RerrDestination>,
}

impl Rerr {
    /// Create a new `Rerr` carrying the given destinations.
    pub fn new(destinations: Vec<RerrDestination>) -> Self {
        Self { destinations }
    }

    /// The unreachable destinations carried in this report.
    pub fn destinations(&self) -> &[RerrDestination] {
        &self.destinations
    }

    /// Calculates the size on the wire of this `Rerr`.
    pub fn wire_size(&self) -> usize {
        1 + self.destinations.len() * RERR_DESTINATION_WIRE_SIZE
    }

    /// Construct an `Rerr` from wire bytes. Returns [`None`] if the buffer
    /// is shorter than its leading destination count requires.
    pub fn from_bytes(mut src: &[u8]) -> Option<Self> {
        if src.remaining() < 1 {
            return None;
        }

        let count = src.get_u8() as usize;
        if src.remaining() < count * RERR_DESTINATION_WIRE_SIZE {
            return None;
        }

        let mut destinations = Vec::with_capacity(count);
        for _ in 0..count {
            destinations.push(RerrDestination {
                address: src.get_u16_le().into(),
                seqno: get_u24_le(&mut src).into(),
            });
        }

        Some(Self { destinations })
    }

    /// Encode this `Rerr` for transmission.
    pub fn write_bytes(&self, dst: &mut bytes::BytesMut) {
        dst.put_u8(self.destinations.len() as u8);
        for destination in &self.destinations {
            dst.put_u16_le(destination.address.into());
            put_u24_le(dst, destination.seqno.truncated());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sequence_number::SeqNo;

    use super::RerrDestination;

    #[test]
    fn encoding() {
        let mut buf = bytes::BytesMut::new();

        let rerr = super::Rerr::new(vec![
            RerrDestination {
                address: 0x0003.into(),
                seqno: SeqNo::from(0x0000_0102),
            },
            RerrDestination {
                address: 0x0010.into(),
                seqno: SeqNo::from(0x00aa_0000),
            },
        ]);

        rerr.write_bytes(&mut buf);

        assert_eq!(buf.len(), 11);
        assert_eq!(buf[..11], [2, 3, 0, 0x02, 0x01, 0, 0x10, 0, 0, 0, 0xaa]);
    }

    #[test]
    fn decoding() {
        let buf = [1, 0x42, 0x00, 9, 0, 0];

        let rerr = super::Rerr::from_bytes(&buf).expect("buffer holds a full encoding");

        assert_eq!(
            rerr.destinations(),
            [RerrDestination {
                address: 0x0042.into(),
                seqno: SeqNo::from(9),
            }]
        );
    }

    #[test]
    fn decode_short_buffer() {
        assert!(super::Rerr::from_bytes(&[]).is_none());
        // Count announces two records, buffer holds one.
        assert!(super::Rerr::from_bytes(&[2, 1, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn roundtrip() {
        let rerr = super::Rerr::new(vec![
            RerrDestination {
                address: 0x0100.into(),
                seqno: SeqNo::from(77),
            },
            RerrDestination {
                address: 0x0200.into(),
                seqno: SeqNo::from(88),
            },
            RerrDestination {
                address: 0x0300.into(),
                seqno: SeqNo::from(99),
            },
        ]);

        let mut buf = bytes::BytesMut::new();
        rerr.write_bytes(&mut buf);
        assert_eq!(buf.len(), rerr.wire_size());

        assert_eq!(super::Rerr::from_bytes(&buf), Some(rerr));
    }
}
