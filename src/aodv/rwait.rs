//! The route wait PDU.

use bytes::{Buf, BufMut};

use crate::address::UnicastAddr;
use crate::sequence_number::SeqNo;

use super::CTL_OP_RWAIT;

/// Wire size of an encoded route wait notice, including the leading opcode
/// octet.
const RWAIT_WIRE_SIZE: usize = 10;

/// A wait notice, sent back toward the originator of a flooded route request
/// by an intermediate node which holds a route to the destination and is
/// shortcutting the request.
///
/// The carried hop count is the intermediate node's distance to the
/// destination; the originator uses it to stretch its ring search patience
/// instead of growing the flood.
///
/// The encoding starts with a repeated copy of the transport control opcode.
/// The octet carries no information of its own but is part of the
/// established wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct Rwait {
    /// Destination of the request being shortcut.
    destination: UnicastAddr,
    /// Originator of the request being shortcut.
    source: UnicastAddr,
    /// Session sequence number of the originator, echoed from the request.
    source_seqno: SeqNo,
    /// Distance from the intermediate node to the destination.
    hop_count: u8,
}

impl Rwait {
    /// Create a new `Rwait` for the request of `source` toward
    /// `destination`.
    pub fn new(
        destination: UnicastAddr,
        source: UnicastAddr,
        source_seqno: SeqNo,
        hop_count: u8,
    ) -> Self {
        Self {
            destination,
            source,
            source_seqno,
            hop_count,
        }
    }

    /// Destination of the shortcut request.
    pub fn destination(&self) -> UnicastAddr {
        self.destination
    }

    /// Originator of the shortcut request.
    pub fn source(&self) -> UnicastAddr {
        self.source
    }

    /// Echoed session sequence number of the originator.
    pub fn source_seqno(&self) -> SeqNo {
        self.source_seqno
    }

    /// Distance from the intermediate node to the destination.
    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// Calculates the size on the wire of this `Rwait`.
    pub fn wire_size(&self) -> usize {
        RWAIT_WIRE_SIZE
    }

    /// Construct an `Rwait` from wire bytes. Returns [`None`] if the buffer
    /// is too short. The leading opcode octet is skipped without
    /// inspection.
    pub fn from_bytes(mut src: &[u8]) -> Option<Self> {
        if src.remaining() < RWAIT_WIRE_SIZE {
            return None;
        }

        let _ = src.get_u8();

        Some(Self {
            destination: src.get_u16_le().into(),
            source: src.get_u16_le().into(),
            source_seqno: src.get_u32_le().into(),
            hop_count: src.get_u8(),
        })
    }

    /// Encode this `Rwait` for transmission.
    pub fn write_bytes(&self, dst: &mut bytes::BytesMut) {
        dst.put_u8(CTL_OP_RWAIT);
        dst.put_u16_le(self.destination.into());
        dst.put_u16_le(self.source.into());
        dst.put_u32_le(self.source_seqno.into());
        dst.put_u8(self.hop_count);
    }
}

#[cfg(test)]
mod tests {
    use crate::sequence_number::SeqNo;

    #[test]
    fn encoding() {
        let mut buf = bytes::BytesMut::new();

        let rwait = super::Rwait::new(0x0003.into(), 0x0001.into(), SeqNo::from(0x0000_1122), 2);

        rwait.write_bytes(&mut buf);

        assert_eq!(buf.len(), 10);
        assert_eq!(buf[..10], [0x0d, 3, 0, 1, 0, 0x22, 0x11, 0, 0, 2]);
    }

    #[test]
    fn decoding() {
        let buf = [0x0d, 0x42, 0x00, 0x10, 0x00, 7, 0, 0, 0, 4];

        let rwait = super::Rwait::from_bytes(&buf).expect("buffer holds a full encoding");

        assert_eq!(rwait.destination(), 0x0042.into());
        assert_eq!(rwait.source(), 0x0010.into());
        assert_eq!(rwait.source_seqno(), SeqNo::from(7));
        assert_eq!(rwait.hop_count(), 4);
    }

    #[test]
    fn decode_short_buffer() {
        assert!(super::Rwait::from_bytes(&[0; 9]).is_none());
    }

    #[test]
    fn roundtrip() {
        let rwait = super::Rwait::new(0x0fff.into(), 0x0aaa.into(), SeqNo::from(918_273), 6);

        let mut buf = bytes::BytesMut::new();
        rwait.write_bytes(&mut buf);
        assert_eq!(buf.len(), rwait.wire_size());

        assert_eq!(super::Rwait::from_bytes(&buf), Some(rwait));
    }
}
