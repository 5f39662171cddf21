//! The route reply PDU.

use bytes::{Buf, BufMut};

use crate::address::UnicastAddr;
use crate::sequence_number::SeqNo;

/// Wire size of an encoded route reply.
const RREP_WIRE_SIZE: usize = 12;

/// Maximum payload buffer reserved for an encoded route reply.
pub const RREP_SDU_MAX: usize = 20;

/// A route reply, travelling unicast from the destination of a route request
/// back toward its originator along the reverse path.
///
/// The reply reveals the authoritative element count of the destination,
/// which the reverse entries created by the request only knew by a single
/// address.
#[derive(Debug, Clone, PartialEq)]
pub struct Rrep {
    /// Whether the answered route may be repaired locally on a link break.
    /// Reserved, carried but never acted on.
    repairable: bool,
    /// Originator of the request being answered.
    source: UnicastAddr,
    /// Destination of the request being answered, i.e. the replier.
    destination: UnicastAddr,
    /// Session sequence number of the destination.
    dest_seqno: SeqNo,
    /// Hops between the sender of this reply and the destination.
    hop_count: u8,
    /// Amount of elements of the destination node.
    dest_elems: u16,
}

impl Rrep {
    /// Create a new `Rrep` answering a request from `source` for
    /// `destination`.
    pub fn new(
        source: UnicastAddr,
        destination: UnicastAddr,
        dest_seqno: SeqNo,
        hop_count: u8,
        dest_elems: u16,
    ) -> Self {
        Self {
            repairable: true,
            source,
            destination,
            dest_seqno,
            hop_count,
            dest_elems,
        }
    }

    /// Originator of the answered request.
    pub fn source(&self) -> UnicastAddr {
        self.source
    }

    /// Destination of the answered request.
    pub fn destination(&self) -> UnicastAddr {
        self.destination
    }

    /// Session sequence number of the destination.
    pub fn dest_seqno(&self) -> SeqNo {
        self.dest_seqno
    }

    /// Hops between the sender of this reply and the destination.
    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// Amount of elements of the destination node.
    pub fn dest_elems(&self) -> u16 {
        self.dest_elems
    }

    /// Whether the answered route may be repaired locally on a link break.
    pub fn repairable(&self) -> bool {
        self.repairable
    }

    /// Update the hop count before forwarding toward the originator.
    pub fn set_hop_count(&mut self, hop_count: u8) {
        self.hop_count = hop_count;
    }

    /// Calculates the size on the wire of this `Rrep`.
    pub fn wire_size(&self) -> usize {
        RREP_WIRE_SIZE
    }

    /// Construct an `Rrep` from wire bytes. Returns [`None`] if the buffer
    /// is too short.
    pub fn from_bytes(mut src: &[u8]) -> Option<Self> {
        if src.remaining() < RREP_WIRE_SIZE {
            return None;
        }

        Some(Self {
            repairable: src.get_u8() != 0,
            source: src.get_u16_le().into(),
            destination: src.get_u16_le().into(),
            dest_seqno: src.get_u32_le().into(),
            hop_count: src.get_u8(),
            dest_elems: src.get_u16_le(),
        })
    }

    /// Encode this `Rrep` for transmission.
    pub fn write_bytes(&self, dst: &mut bytes::BytesMut) {
        dst.put_u8(self.repairable as u8);
        dst.put_u16_le(self.source.into());
        dst.put_u16_le(self.destination.into());
        dst.put_u32_le(self.dest_seqno.into());
        dst.put_u8(self.hop_count);
        dst.put_u16_le(self.dest_elems);
    }
}

#[cfg(test)]
mod tests {
    use crate::sequence_number::SeqNo;

    #[test]
    fn encoding() {
        let mut buf = bytes::BytesMut::new();

        let rrep = super::Rrep::new(
            0x0001.into(),
            0x0a0b.into(),
            SeqNo::from(0x0102_0304),
            0,
            3,
        );

        rrep.write_bytes(&mut buf);

        assert_eq!(buf.len(), 12);
        assert_eq!(buf[..12], [1, 1, 0, 0x0b, 0x0a, 4, 3, 2, 1, 0, 3, 0]);
    }

    #[test]
    fn decoding() {
        let buf = [0, 0x10, 0x00, 0x30, 0x00, 9, 0, 0, 0, 2, 1, 0];

        let rrep = super::Rrep::from_bytes(&buf).expect("buffer holds a full encoding");

        assert_eq!(rrep.source(), 0x0010.into());
        assert_eq!(rrep.destination(), 0x0030.into());
        assert_eq!(rrep.dest_seqno(), SeqNo::from(9));
        assert_eq!(rrep.hop_count(), 2);
        assert_eq!(rrep.dest_elems(), 1);
    }

    #[test]
    fn decode_short_buffer() {
        assert!(super::Rrep::from_bytes(&[0; 11]).is_none());
    }

    #[test]
    fn roundtrip() {
        let mut rrep = super::Rrep::new(
            0x0099.into(),
            0x0777.into(),
            SeqNo::from(123_456_789),
            4,
            7,
        );
        rrep.set_hop_count(5);

        let mut buf = bytes::BytesMut::new();
        rrep.write_bytes(&mut buf);
        assert_eq!(buf.len(), rrep.wire_size());

        assert_eq!(super::Rrep::from_bytes(&buf), Some(rrep));
    }
}
